use std::io;

use thiserror::Error as ThisError;

/// Errors that could occur while writing an exposition.
#[derive(Debug, ThisError)]
pub enum ExpositionError {
    /// The negotiated format has no writer available, such as protobuf without the `protobuf`
    /// feature.
    #[error("exposition format `{0}` is not available")]
    FormatUnavailable(String),

    /// Writing to the output sink failed.
    #[error("failed to write the exposition: {0}")]
    Io(#[from] io::Error),

    /// Encoding a protobuf message failed.
    #[cfg(feature = "protobuf")]
    #[error("failed to encode a metric family: {0}")]
    Encode(#[from] prost::EncodeError),
}
