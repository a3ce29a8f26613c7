//! Error taxonomy for the context core
//!
//! Missing records are not errors: accessors return `Option` and the
//! assembler omits the section. Everything here is a real failure the
//! caller has to see.

/// Errors surfaced by the store, the extraction engine and the assembler
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The store could not be reached or a query failed
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller handed over a batch that breaks an extraction precondition
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Extraction was asked to process no messages
    #[error("nothing to extract for ticket {ticket_id}")]
    EmptyBatch { ticket_id: i64 },

    /// Another extraction consumed the message first
    #[error("message {message_id} was summarized by a concurrent extraction")]
    Conflict { message_id: i64 },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ContextError {
    /// Transient failures where retrying the same batch is safe
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContextError::StoreUnavailable(_))
    }

    /// Caller errors; nothing was committed and a retry fails the same way
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            ContextError::InvariantViolation(_)
                | ContextError::EmptyBatch { .. }
                | ContextError::Conflict { .. }
        )
    }
}

impl From<rusqlite::Error> for ContextError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            // CHECK, NOT NULL and FOREIGN KEY failures repeat on every retry
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ContextError::InvariantViolation(e.to_string())
            }
            _ => ContextError::StoreUnavailable(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for ContextError {
    fn from(e: r2d2::Error) -> Self {
        ContextError::StoreUnavailable(format!("pool: {e}"))
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(e: serde_json::Error) -> Self {
        ContextError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_is_distinct_from_store_failure() {
        let empty = ContextError::EmptyBatch { ticket_id: 7 };
        let down = ContextError::StoreUnavailable("locked".into());

        assert!(empty.is_invariant_violation());
        assert!(!empty.is_retryable());
        assert!(down.is_retryable());
        assert!(!down.is_invariant_violation());
        assert_eq!(empty.to_string(), "nothing to extract for ticket 7");
    }

    #[test]
    fn constraint_failures_are_not_retryable() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_CHECK),
            Some("CHECK constraint failed: tokens_after <= tokens_before".into()),
        );
        let err = ContextError::from(constraint);
        assert!(matches!(err, ContextError::InvariantViolation(_)));
        assert!(!err.is_retryable());

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(ContextError::from(busy).is_retryable());
    }

    #[test]
    fn conflict_is_not_retried() {
        let err = ContextError::Conflict { message_id: 3 };
        assert!(!err.is_retryable());
        assert!(err.is_invariant_violation());
    }
}
