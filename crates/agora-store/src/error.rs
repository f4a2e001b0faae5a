//! Store error types

use agora_types::AgoraError;
use thiserror::Error;

/// Entity store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, message: impl ToString) -> Self {
        Self::Corrupt {
            table,
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for AgoraError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidInput(message) => AgoraError::InvalidInput { message },
            other => AgoraError::Store {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
