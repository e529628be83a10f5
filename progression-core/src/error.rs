//! Error types shared by the engine and the storage backends.

use std::error::Error as StdError;

/// Failure reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness rule was violated (duplicate degree, seeded catalogue, ...)
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Any other backend failure (connection, query, serialization)
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }

    pub fn backend_msg(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        StoreError::Backend(msg.into())
    }
}

/// Error type for every engine operation.
#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProgressionError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ProgressionError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ProgressionError::InvalidState(msg.into())
    }
}

pub type ProgressionResult<T> = Result<T, ProgressionError>;

/// Outcome of an idempotent operation. A repeated request is a normal
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed<T> {
    Applied(T),
    AlreadyProcessed { reason: String },
}

impl<T> Processed<T> {
    pub fn already(reason: impl Into<String>) -> Self {
        Processed::AlreadyProcessed {
            reason: reason.into(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Processed::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Processed::Applied(value) => Some(value),
            Processed::AlreadyProcessed { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Processed<U> {
        match self {
            Processed::Applied(value) => Processed::Applied(f(value)),
            Processed::AlreadyProcessed { reason } => Processed::AlreadyProcessed { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = ProgressionError::not_found("Student", "s-1");
        assert_eq!(err.to_string(), "Student not found: s-1");
    }

    #[test]
    fn test_store_error_converts() {
        let err: ProgressionError = StoreError::Conflict("degree 2 exists".into()).into();
        assert!(matches!(err, ProgressionError::Storage(StoreError::Conflict(_))));
        assert!(err.to_string().contains("degree 2 exists"));
    }

    #[test]
    fn test_processed_map_and_applied() {
        let p: Processed<i64> = Processed::Applied(5);
        assert!(p.is_applied());
        assert_eq!(p.map(|v| v * 2).applied(), Some(10));

        let dup: Processed<i64> = Processed::already("seen");
        assert!(!dup.is_applied());
        assert_eq!(dup.applied(), None);
    }
}
