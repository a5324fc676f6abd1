//! Read-only diagnostics snapshot for operational tooling.
//!
//! The UI and troubleshooting tools observe sync health here instead of
//! through errors: nothing in the engine propagates transport failures
//! to its callers.

use crate::config::ReconcileConfig;
use serde::Serialize;
use setlog_core::{
    EntityKind, EntityRef, Intent, LocalId, OpStatus, OperationId, RemoteId, UnixMillis,
};
use setlog_store::{LocalStore, StoreResult};
use std::collections::HashMap;

/// Derived sync state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySyncState {
    /// Exists only on this device; no operation is working on it.
    LocalOnly,
    /// Has queued work waiting to be dispatched or retried.
    AwaitingSync,
    /// An operation for it is on the network right now.
    InFlight,
    /// Holds a remote identifier and has no outstanding work.
    Synced,
    /// Its head operation has failed and awaits re-trigger.
    Failed,
    /// Tombstoned; a remote delete is still outstanding.
    Deleting,
}

/// One entity row in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    /// Entity kind.
    pub kind: EntityKind,
    /// Local identifier.
    pub local_id: LocalId,
    /// Remote identifier, if resolved.
    pub remote_id: Option<RemoteId>,
    /// Derived sync state.
    pub state: EntitySyncState,
    /// Whether the entity is in a terminal local state.
    pub terminal: bool,
    /// Last local mutation time.
    pub updated_at: UnixMillis,
}

/// One operation row in the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OperationView {
    /// Operation id.
    pub id: OperationId,
    /// Target entity kind.
    pub kind: EntityKind,
    /// Target entity local id.
    pub local_id: LocalId,
    /// Mutation intent.
    pub intent: Intent,
    /// Lifecycle status.
    pub status: OpStatus,
    /// Attempts charged.
    pub attempts: u32,
    /// Enqueue time.
    pub created_at: UnixMillis,
    /// Last attempt time.
    pub last_attempt_at: Option<UnixMillis>,
    /// Next retry eligibility.
    pub next_attempt_at: Option<UnixMillis>,
    /// Most recent error.
    pub last_error: Option<String>,
}

/// A read-only snapshot of sync health.
///
/// Listing every entity with its derived state, every queue operation,
/// and the currently detected orphaned/stuck/failed sets. Pure reads;
/// repair belongs to the reconciler.
#[derive(Debug, Clone, Serialize)]
pub struct SyncDiagnostics {
    /// When the snapshot was taken.
    pub captured_at: UnixMillis,
    /// All entities with derived sync state.
    pub entities: Vec<EntityView>,
    /// All queue operations.
    pub operations: Vec<OperationView>,
    /// Operations whose target entity no longer exists.
    pub orphaned: Vec<OperationId>,
    /// Terminal entities with no remote id and no active operation.
    pub stuck: Vec<EntityRef>,
    /// Failed operations past the configured grace period.
    pub stale_failed: Vec<OperationId>,
}

impl SyncDiagnostics {
    /// Captures a snapshot from the local store.
    pub fn capture(
        store: &dyn LocalStore,
        config: &ReconcileConfig,
        now: UnixMillis,
    ) -> StoreResult<Self> {
        let entities = store.list_entities()?;
        let operations = store.list_operations()?;

        // Head (lowest-id non-done) status per entity drives the
        // derived entity state.
        let mut head_status: HashMap<EntityRef, OpStatus> = HashMap::new();
        for op in &operations {
            if op.status != OpStatus::Done {
                head_status.entry(op.entity_ref()).or_insert(op.status);
            }
        }

        let entity_views: Vec<EntityView> = entities
            .iter()
            .map(|record| {
                let head = head_status.get(&record.entity_ref()).copied();
                let state = if record.deleted {
                    EntitySyncState::Deleting
                } else {
                    match head {
                        Some(OpStatus::InFlight) => EntitySyncState::InFlight,
                        Some(OpStatus::Pending | OpStatus::Retrying) => {
                            EntitySyncState::AwaitingSync
                        }
                        Some(OpStatus::Failed) => EntitySyncState::Failed,
                        Some(OpStatus::Done) | None => {
                            if record.is_synced() {
                                EntitySyncState::Synced
                            } else {
                                EntitySyncState::LocalOnly
                            }
                        }
                    }
                };
                EntityView {
                    kind: record.kind,
                    local_id: record.local_id,
                    remote_id: record.remote_id.clone(),
                    state,
                    terminal: record.terminal,
                    updated_at: record.updated_at,
                }
            })
            .collect();

        let entity_refs: std::collections::HashSet<EntityRef> =
            entities.iter().map(|record| record.entity_ref()).collect();

        let orphaned = operations
            .iter()
            .filter(|op| {
                op.status != OpStatus::Done
                    && op.intent != Intent::Delete
                    && !entity_refs.contains(&op.entity_ref())
            })
            .map(|op| op.id)
            .collect();

        let stuck = entities
            .iter()
            .filter(|record| {
                record.terminal
                    && !record.deleted
                    && record.remote_id.is_none()
                    && !head_status.contains_key(&record.entity_ref())
            })
            .map(|record| record.entity_ref())
            .collect();

        let stale_failed = operations
            .iter()
            .filter(|op| {
                op.status == OpStatus::Failed
                    && now.since(op.last_attempt_at.unwrap_or(op.created_at))
                        >= config.failed_grace.as_millis() as u64
            })
            .map(|op| op.id)
            .collect();

        let operation_views = operations
            .iter()
            .map(|op| OperationView {
                id: op.id,
                kind: op.kind,
                local_id: op.local_id,
                intent: op.intent,
                status: op.status,
                attempts: op.attempts,
                created_at: op.created_at,
                last_attempt_at: op.last_attempt_at,
                next_attempt_at: op.next_attempt_at,
                last_error: op.last_error.clone(),
            })
            .collect();

        Ok(Self {
            captured_at: now,
            entities: entity_views,
            operations: operation_views,
            orphaned,
            stuck,
            stale_failed,
        })
    }

    /// Count of operations currently on the network.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.status == OpStatus::InFlight)
            .count()
    }

    /// Returns true if every entity is synced and no work is
    /// outstanding.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.orphaned.is_empty()
            && self.stuck.is_empty()
            && self.stale_failed.is_empty()
            && self
                .entities
                .iter()
                .all(|entity| entity.state == EntitySyncState::Synced)
            && self
                .operations
                .iter()
                .all(|op| op.status == OpStatus::Done)
    }
}
