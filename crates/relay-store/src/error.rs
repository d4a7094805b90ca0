use relay_core::RelayError;

/// Failures of the shared store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend query failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A counter key holds a non-integer value.
    #[error("type mismatch at {key}: expected {expected}")]
    TypeMismatch {
        /// Offending key.
        key: String,
        /// What the operation expected to find.
        expected: &'static str,
    },

    /// Filesystem failure opening the backend.
    #[error("IO error: {0}")]
    Io(String),

    /// Background task running the query was lost.
    #[error("store task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        RelayError::Internal(e.to_string())
    }
}
