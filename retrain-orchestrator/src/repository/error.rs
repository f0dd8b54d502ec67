//! Repository error type

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by storage adapters
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("model '{model_name}' already has a version {version}")]
    VersionExists { model_name: String, version: String },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("stored record is inconsistent: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Checks that a model name can be used as a file or key component
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
