//! Durable operation records and the status state machine.

use crate::types::{EntityKind, EntityRef, LocalId, OperationId, UnixMillis};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutation intent of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Entity should be created remotely.
    Create,
    /// Entity should be updated remotely.
    Update,
    /// Entity should be deleted remotely.
    Delete,
}

/// Lifecycle status of a queued operation.
///
/// Status moves forward only:
///
/// ```text
/// pending -> in_flight -> (done | retrying | failed)
/// retrying -> in_flight
/// ```
///
/// Two backward edges exist by design: `in_flight -> pending` when a
/// dispatch is cancelled by connectivity loss (no attempt penalty), and
/// `failed -> pending` on an explicit re-trigger. There is no transition
/// out of `done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Currently being delivered to the remote store.
    InFlight,
    /// Failed transiently; eligible again once the backoff elapses.
    Retrying,
    /// Failed permanently or exhausted its attempts; awaits re-trigger.
    Failed,
    /// Delivered successfully. Terminal.
    Done,
}

impl OpStatus {
    /// Returns true if the transition `self -> to` is allowed.
    ///
    /// Same-state transitions are allowed so that status marks are
    /// idempotent under retried confirmations.
    #[must_use]
    pub fn can_transition(self, to: OpStatus) -> bool {
        use OpStatus::{Done, Failed, InFlight, Pending, Retrying};
        if self == to {
            return true;
        }
        match (self, to) {
            (Pending, InFlight) => true,
            (InFlight, Done | Retrying | Failed) => true,
            // Connectivity-loss revert, no attempt penalty.
            (InFlight, Pending) => true,
            (Retrying, InFlight) => true,
            // Explicit re-trigger only.
            (Failed, Pending) => true,
            _ => false,
        }
    }

    /// Returns true if the operation still needs delivery work.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, OpStatus::Pending | OpStatus::InFlight | OpStatus::Retrying)
    }
}

/// A durable queue record representing one pending or completed mutation
/// intent.
///
/// The payload snapshot is taken at enqueue time so the intent can be
/// replayed remotely even if the entity mutates again afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Monotonic identifier, assigned at enqueue time. Defines total
    /// order within an entity and doubles as the idempotency token.
    pub id: OperationId,
    /// Kind of the target entity.
    pub kind: EntityKind,
    /// Local identifier of the target entity.
    pub local_id: LocalId,
    /// Mutation intent.
    pub intent: Intent,
    /// Payload snapshot needed to replay the intent remotely.
    pub payload: Value,
    /// Lifecycle status.
    pub status: OpStatus,
    /// Number of delivery attempts charged so far.
    pub attempts: u32,
    /// Enqueue time.
    pub created_at: UnixMillis,
    /// Time of the most recent delivery attempt.
    pub last_attempt_at: Option<UnixMillis>,
    /// Earliest time a `Retrying` operation is eligible again.
    pub next_attempt_at: Option<UnixMillis>,
    /// Most recent delivery error, if any.
    pub last_error: Option<String>,
    /// Whether the reconciler has already auto-retried this operation
    /// after it failed.
    pub auto_retried: bool,
}

impl Operation {
    /// Creates a new `Pending` operation.
    #[must_use]
    pub fn new(
        id: OperationId,
        kind: EntityKind,
        local_id: LocalId,
        intent: Intent,
        payload: Value,
        now: UnixMillis,
    ) -> Self {
        Self {
            id,
            kind,
            local_id,
            intent,
            payload,
            status: OpStatus::Pending,
            attempts: 0,
            created_at: now,
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
            auto_retried: false,
        }
    }

    /// The (kind, local id) reference of the target entity.
    #[must_use]
    pub const fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.local_id)
    }

    /// Returns true if the operation may be dispatched at `now`.
    ///
    /// `Pending` is always eligible; `Retrying` only once its backoff
    /// window has elapsed.
    #[must_use]
    pub fn is_eligible(&self, now: UnixMillis) -> bool {
        match self.status {
            OpStatus::Pending => true,
            OpStatus::Retrying => self.next_attempt_at.is_none_or(|at| at <= now),
            _ => false,
        }
    }
}
