//! Error types for the sync engine.

use setlog_core::{EntityRef, OpStatus, OperationId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the delivery can be retried.
        retryable: bool,
    },

    /// Transport call timed out.
    #[error("transport call timed out")]
    Timeout,

    /// Remote store rejected the payload. Not retried automatically.
    #[error("remote rejected payload: {0}")]
    Rejected(String),

    /// Local store error during sync.
    #[error("store error: {0}")]
    Store(#[from] setlog_store::StoreError),

    /// Operation record not found in the queue.
    #[error("unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// Status transition not allowed by the state machine.
    #[error("invalid status transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Operation id.
        id: OperationId,
        /// Current status.
        from: OpStatus,
        /// Attempted target status.
        to: OpStatus,
    },

    /// Entity is tombstoned; no further mutations may be queued.
    #[error("entity deleted: {0}")]
    EntityDeleted(EntityRef),

    /// Entity already holds a different remote identifier.
    #[error("remote id conflict for {entity}: have {existing}, got {incoming}")]
    RemoteIdConflict {
        /// The entity in question.
        entity: EntityRef,
        /// Remote id already recorded.
        existing: String,
        /// Remote id offered by the confirmation.
        incoming: String,
    },

    /// Entity record missing where one was required.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityRef),

    /// A create was enqueued for an entity that already exists locally.
    #[error("entity already exists: {0}")]
    EntityExists(EntityRef),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if delivery may be retried with backoff.
    ///
    /// Timeouts, connection failures, rate limiting, and server
    /// unavailability are transient; payload rejection is permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Rejected(_) => false,
            _ => false,
        }
    }
}
