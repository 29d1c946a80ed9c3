//! Error types for segscan

use thiserror::Error;

/// Result type alias for segscan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for segscan operations
///
/// Early termination requested by a scan task is not an error; see
/// [`crate::tasks::Flow`] and [`crate::iterator::RangeOutcome`].
#[derive(Error, Debug)]
pub enum Error {
    /// Binary framing is broken: bad magic number, truncated or garbled header
    #[error("Format error: {0}")]
    Format(String),

    /// Content could not be interpreted (field ids, storage version, pk type, row alignment)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Predicate could not be compiled
    #[error("Filter error: {0}")]
    Filter(String),

    /// Local I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] opendal::Error),

    /// Arrow operation failed
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet operation failed
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The scan was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("segment 42".to_string());
        assert!(err.to_string().contains("segment 42"));
    }

    #[test]
    fn test_format_and_decode_are_distinct() {
        let format = Error::format("magic number mismatch");
        let decode = Error::decode("missing field-id metadata");
        assert!(matches!(format, Error::Format(_)));
        assert!(matches!(decode, Error::Decode(_)));
        assert!(format.to_string().starts_with("Format error"));
        assert!(decode.to_string().contains("field-id"));
    }
}
