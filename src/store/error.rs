use thiserror::Error;

/// Errors surfaced by a [`super::CoordinationStore`] implementation (§7).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The calling task's cancellation handle fired mid-operation. Never
    /// logged as a fault by callers — it reflects orderly shutdown, not a
    /// store problem.
    #[error("operation cancelled")]
    Cancelled,

    /// The store could not be reached within the operation timeout.
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// The requested key does not exist.
    #[error("not found")]
    NotFound,

    /// A set-if-absent (lock) operation lost a race to another holder.
    #[error("lock already held")]
    Conflict,

    /// A backend-specific failure that isn't one of the above.
    #[error("coordination store error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}
