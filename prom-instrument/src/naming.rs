//! Validation and sanitization of metric names, label names and units.
//!
//! These follow the Prometheus [data model].
//!
//! [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
use crate::error::{ArgumentError, LabelError};

/// Returns `true` if `name` matches `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_metric_name_start(c) => {}
        _ => return false,
    }
    chars.all(is_metric_name_char)
}

/// Returns `true` if `name` matches `[a-zA-Z_][a-zA-Z0-9_]*`.
///
/// Reserved names (`__` prefix) are valid under this check; see [`validate_label_name`].
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_label_name_start(c) => {}
        _ => return false,
    }
    chars.all(is_label_name_char)
}

/// Validates a metric name.
pub fn validate_metric_name(name: &str) -> Result<(), ArgumentError> {
    if is_valid_metric_name(name) {
        Ok(())
    } else {
        Err(ArgumentError::InvalidMetricName(name.to_string()))
    }
}

/// Validates a single label name.
pub fn validate_label_name(name: &str) -> Result<(), LabelError> {
    if name.is_empty() {
        return Err(LabelError::EmptyName);
    }
    if !is_valid_label_name(name) {
        return Err(LabelError::InvalidName(name.to_string()));
    }
    if name.starts_with("__") {
        return Err(LabelError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Validates a list of label names: each must be valid, and no name may be repeated.
pub fn validate_label_names<S: AsRef<str>>(names: &[S]) -> Result<(), LabelError> {
    for (i, name) in names.iter().enumerate() {
        let name = name.as_ref();
        validate_label_name(name)?;
        if names[..i].iter().any(|other| other.as_ref() == name) {
            return Err(LabelError::DuplicateName(name.to_string()));
        }
    }
    Ok(())
}

/// Suffixes that encoders append to metric names, and that a base name must therefore not
/// carry.
pub const RESERVED_METRIC_NAME_SUFFIXES: [&str; 4] = ["_total", "_created", "_bucket", "_info"];

/// Returns the reserved suffix `name` ends with, if any.
pub fn reserved_suffix(name: &str) -> Option<&'static str> {
    RESERVED_METRIC_NAME_SUFFIXES.iter().copied().find(|suffix| name.ends_with(suffix))
}

/// Validates a base metric name: it must be valid and must not end with a reserved suffix.
pub fn validate_base_metric_name(name: &str) -> Result<(), ArgumentError> {
    validate_metric_name(name)?;
    match reserved_suffix(name) {
        Some(suffix) => {
            Err(ArgumentError::ReservedMetricNameSuffix { name: name.to_string(), suffix })
        }
        None => Ok(()),
    }
}

/// Turns an arbitrary string, such as a name taken from another metrics system, into a base
/// metric name.
///
/// Invalid characters become `_` and reserved suffixes are removed, repeatedly, so
/// `requests_total_total` becomes `requests`. The result is only empty when `name` is.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut sanitized = replace_invalid(name, is_metric_name_start, is_metric_name_char);
    while let Some(suffix) = reserved_suffix(&sanitized) {
        if sanitized.len() == suffix.len() {
            break;
        }
        sanitized.truncate(sanitized.len() - suffix.len());
    }
    sanitized
}

/// Turns an arbitrary string into a label name.
///
/// Invalid characters become `_`, and leading underscores are trimmed until the name no longer
/// has the reserved `__` prefix.
pub fn sanitize_label_name(name: &str) -> String {
    let sanitized = replace_invalid(name, is_label_name_start, is_label_name_char);
    let mut trimmed = sanitized.as_str();
    while trimmed.starts_with("__") {
        trimmed = &trimmed[1..];
    }
    trimmed.to_string()
}

fn replace_invalid(name: &str, start: fn(char) -> bool, rest: fn(char) -> bool) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 { start(c) } else { rest(c) };
        sanitized.push(if valid { c } else { '_' });
    }
    sanitized
}

/// Strips `suffix` (including its leading underscore) from `name`, if present.
pub(crate) fn strip_suffix<'a>(name: &'a str, suffix: &str) -> &'a str {
    match name.strip_suffix(suffix) {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => name,
    }
}

/// Appends `_<unit>` to the metric name if it is not already part of it.
///
/// If the name ends with a known suffix, the unit is inserted before the suffix.
pub(crate) fn add_unit_if_missing(name: &str, unit: &str) -> String {
    const KNOWN_SUFFIXES: [&str; 4] = ["_sum", "_count", "_bucket", "_total"];

    let mut buffer = name.to_string();
    let unit_suffix = format!("_{unit}");
    for suffix in KNOWN_SUFFIXES {
        if buffer.ends_with(suffix) {
            let suffix_pos = buffer.len() - suffix.len();
            if !buffer[..suffix_pos].ends_with(&unit_suffix) {
                buffer.insert_str(suffix_pos, &unit_suffix);
            }
            return buffer;
        }
    }
    if !buffer.ends_with(&unit_suffix) {
        buffer.push_str(&unit_suffix);
    }
    buffer
}

fn is_metric_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_metric_name_char(c: char) -> bool {
    is_metric_name_start(c) || c.is_ascii_digit()
}

fn is_label_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_label_name_char(c: char) -> bool {
    is_label_name_start(c) || c.is_ascii_digit()
}
