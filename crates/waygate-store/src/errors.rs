//! Store error types.

use waygate_core::CoreError;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store is unavailable or returned a protocol error.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A persisted record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An optimistic update lost all of its retries.
    #[error("concurrent update conflict on {key}")]
    Conflict {
        /// The contested key.
        key: String,
    },

    /// Token generation could not find a unique value within the retry
    /// budget.
    #[error("token generation failed after {attempts} attempts")]
    Generation {
        /// How many attempts were made.
        attempts: u32,
    },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { key } => CoreError::Conflict(key),
            StoreError::Generation { attempts } => {
                CoreError::Internal(format!("token generation exhausted {attempts} attempts"))
            }
            StoreError::Backend(msg) => CoreError::Upstream(msg),
            StoreError::Serialization(e) => CoreError::Internal(e.to_string()),
        }
    }
}
