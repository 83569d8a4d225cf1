//! Label sets identifying individual series.
use std::fmt;

use crate::error::LabelError;
use crate::naming::validate_label_names;

/// Maximum length, in bytes, of a single label value.
pub const MAX_LABEL_VALUE_LEN: usize = 4096;

/// An immutable set of label name/value pairs.
///
/// Pairs are kept sorted by name, so two label sets built from the same pairs in a different
/// order compare and hash equally.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels {
    pairs: Vec<(String, String)>,
}

impl Labels {
    /// Creates an empty label set.
    pub const fn empty() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Validates a list of label names.
    ///
    /// Fails if any name is empty, malformed, reserved (starts with `__`), or repeated.
    pub fn validate<S: AsRef<str>>(names: &[S]) -> Result<(), LabelError> {
        validate_label_names(names)
    }

    /// Builds a label set from parallel slices of names and values.
    pub fn of<N, V>(names: &[N], values: &[V]) -> Result<Self, LabelError>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        if names.len() != values.len() {
            return Err(LabelError::ArityMismatch { expected: names.len(), actual: values.len() });
        }
        validate_label_names(names)?;

        let mut pairs = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values) {
            let (name, value) = (name.as_ref(), value.as_ref());
            check_value_len(name, value)?;
            pairs.push((name.to_string(), value.to_string()));
        }
        pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        Ok(Self { pairs })
    }

    /// Builds a label set from name/value pairs.
    pub fn from_pairs<I, N, V>(pairs: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let (names, values): (Vec<String>, Vec<String>) =
            pairs.into_iter().map(|(n, v)| (n.into(), v.into())).unzip();
        Self::of(names.as_slice(), values.as_slice())
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` if there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Value of the label called `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|idx| self.pairs[idx].1.as_str())
    }

    /// Returns `true` if a label with the given name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over the pairs, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Iterates over the label names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(n, _)| n.as_str())
    }

    /// Total number of characters across all names and values.
    pub fn char_count(&self) -> usize {
        self.pairs.iter().map(|(n, v)| n.chars().count() + v.chars().count()).sum()
    }
}

fn check_value_len(name: &str, value: &str) -> Result<(), LabelError> {
    if value.len() > MAX_LABEL_VALUE_LEN {
        return Err(LabelError::ValueTooLong {
            name: name.to_string(),
            len: value.len(),
            max: MAX_LABEL_VALUE_LEN,
        });
    }
    Ok(())
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        f.write_str("}")
    }
}
