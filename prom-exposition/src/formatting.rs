//! Helpers shared by the text exposition formats.
use prom_instrument::{Exemplar, Labels};

/// Which characters a string written after a `# HELP` marker must escape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HelpEscaping {
    /// Backslashes and line feeds, as the Prometheus [text format] requires.
    ///
    /// [text format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
    Prometheus,
    /// Backslashes, double quotes and line feeds.
    OpenMetrics,
}

/// Writes a `# HELP` line.
pub(crate) fn write_help_line(
    buffer: &mut String,
    name: &str,
    suffix: Option<&str>,
    help: &str,
    escaping: HelpEscaping,
) {
    buffer.push_str("# HELP ");
    push_name(buffer, name, suffix);
    buffer.push(' ');
    match escaping {
        HelpEscaping::Prometheus => push_escaped(buffer, help, false),
        HelpEscaping::OpenMetrics => push_escaped(buffer, help, true),
    }
    buffer.push('\n');
}

/// Writes a `# TYPE` line.
pub(crate) fn write_type_line(
    buffer: &mut String,
    name: &str,
    suffix: Option<&str>,
    metric_type: &str,
) {
    buffer.push_str("# TYPE ");
    push_name(buffer, name, suffix);
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a `# UNIT` line.
pub(crate) fn write_unit_line(buffer: &mut String, name: &str, unit: &str) {
    buffer.push_str("# UNIT ");
    buffer.push_str(name);
    buffer.push(' ');
    push_escaped(buffer, unit, true);
    buffer.push('\n');
}

/// Writes the name and labels of a sample, followed by the space separating them from the value.
///
/// `additional_label` is a data type specific label, such as `le` for histogram buckets or
/// `quantile` for summaries, written after the sample's own labels.
pub(crate) fn write_name_and_labels(
    buffer: &mut String,
    name: &str,
    suffix: Option<&str>,
    labels: &Labels,
    additional_label: Option<(&str, &str)>,
) {
    push_name(buffer, name, suffix);
    if !labels.is_empty() || additional_label.is_some() {
        write_labels(buffer, labels, additional_label);
    }
    buffer.push(' ');
}

/// Writes `{name="value",...}`, always including the braces.
pub(crate) fn write_labels(
    buffer: &mut String,
    labels: &Labels,
    additional_label: Option<(&str, &str)>,
) {
    buffer.push('{');
    let mut first = true;
    for (name, value) in labels.iter().chain(additional_label) {
        if first {
            first = false;
        } else {
            buffer.push(',');
        }
        buffer.push_str(name);
        buffer.push_str("=\"");
        push_escaped(buffer, value, true);
        buffer.push('"');
    }
    buffer.push('}');
}

/// Writes an OpenMetrics exemplar trailer, ` # {labels} value[ timestamp]`.
pub(crate) fn write_exemplar(buffer: &mut String, exemplar: &Exemplar) {
    buffer.push_str(" # ");
    write_labels(buffer, exemplar.labels(), None);
    buffer.push(' ');
    write_double(buffer, exemplar.value());
    if let Some(timestamp) = exemplar.timestamp_millis() {
        buffer.push(' ');
        write_seconds_timestamp(buffer, timestamp);
    }
}

/// Writes a floating point value.
///
/// Infinities are written as `+Inf` and `-Inf`. Integral values keep a trailing `.0` so that
/// they read as floating point values.
pub(crate) fn write_double(buffer: &mut String, value: f64) {
    buffer.push_str(&format_double(value));
}

pub(crate) fn format_double(value: f64) -> String {
    if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else if value.is_nan() {
        "NaN".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

pub(crate) fn write_u64(buffer: &mut String, value: u64) {
    let mut itoa = itoa::Buffer::new();
    buffer.push_str(itoa.format(value));
}

/// Writes a millisecond timestamp as is, the way the Prometheus text format expects it.
pub(crate) fn write_millis_timestamp(buffer: &mut String, millis: i64) {
    let mut itoa = itoa::Buffer::new();
    buffer.push_str(itoa.format(millis));
}

/// Writes a millisecond timestamp as seconds with exactly three decimals, such as `1.005`.
pub(crate) fn write_seconds_timestamp(buffer: &mut String, millis: i64) {
    if millis < 0 {
        buffer.push('-');
    }
    let millis = millis.unsigned_abs();
    let (seconds, millis) = (millis / 1000, millis % 1000);
    let mut itoa = itoa::Buffer::new();
    buffer.push_str(itoa.format(seconds));
    buffer.push('.');
    if millis < 100 {
        buffer.push('0');
    }
    if millis < 10 {
        buffer.push('0');
    }
    buffer.push_str(itoa.format(millis));
}

fn push_name(buffer: &mut String, name: &str, suffix: Option<&str>) {
    buffer.push_str(name);
    if let Some(suffix) = suffix {
        buffer.push_str(suffix);
    }
}

fn push_escaped(buffer: &mut String, value: &str, escape_quotes: bool) {
    for c in value.chars() {
        match c {
            '\\' => buffer.push_str("\\\\"),
            '\n' => buffer.push_str("\\n"),
            '"' if escape_quotes => buffer.push_str("\\\""),
            c => buffer.push(c),
        }
    }
}
