use thiserror::Error;

/// Structured error types for storage and layer operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("malformed payload in {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound { .. })
    }
}
