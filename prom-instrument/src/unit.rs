use std::fmt;

use crate::error::ArgumentError;

/// Unit of measurement for a metric.
///
/// Prometheus and OpenMetrics expect base units, so the predefined constants cover seconds
/// rather than milliseconds, bytes rather than kilobytes, and so on. Any other unit matching
/// `[a-zA-Z0-9_]+` can be created with [`Unit::new`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Unit(String);

impl Unit {
    /// Dimensionless ratio, usually in `[0, 1]`.
    pub const RATIO: &'static str = "ratio";
    /// Seconds.
    pub const SECONDS: &'static str = "seconds";
    /// Bytes.
    pub const BYTES: &'static str = "bytes";
    /// Degrees Celsius.
    pub const CELSIUS: &'static str = "celsius";
    /// Joules.
    pub const JOULES: &'static str = "joules";
    /// Grams.
    pub const GRAMS: &'static str = "grams";
    /// Meters.
    pub const METERS: &'static str = "meters";
    /// Volts.
    pub const VOLTS: &'static str = "volts";
    /// Amperes.
    pub const AMPERES: &'static str = "amperes";

    /// Creates a unit, validating its name.
    pub fn new(unit: impl Into<String>) -> Result<Self, ArgumentError> {
        let unit = unit.into();
        let unit = unit.trim().to_string();
        if unit.is_empty() || !unit.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ArgumentError::InvalidUnit(unit));
        }
        Ok(Self(unit))
    }

    /// [`Unit::SECONDS`] as a unit.
    pub fn seconds() -> Self {
        Self(Self::SECONDS.to_string())
    }

    /// [`Unit::BYTES`] as a unit.
    pub fn bytes() -> Self {
        Self(Self::BYTES.to_string())
    }

    /// [`Unit::RATIO`] as a unit.
    pub fn ratio() -> Self {
        Self(Self::RATIO.to_string())
    }

    /// Gets the unit as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
