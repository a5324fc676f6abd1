//! Error types for the local store.

use setlog_core::{EntityRef, OperationId};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityRef),

    /// Operation record not found.
    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    /// The backend could not commit a write batch.
    #[error("write batch failed: {0}")]
    BatchFailed(String),

    /// Backend-specific failure (I/O, corruption).
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use setlog_core::{EntityKind, LocalId};

    #[test]
    fn error_display() {
        let err = StoreError::OperationNotFound(OperationId::new(9));
        assert_eq!(err.to_string(), "operation not found: op:9");

        let err = StoreError::EntityNotFound(EntityRef::new(
            EntityKind::Profile,
            LocalId::from_bytes([0u8; 16]),
        ));
        assert!(err.to_string().contains("profile:"));
    }
}
