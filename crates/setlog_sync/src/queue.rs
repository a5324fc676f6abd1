//! Durable operation queue (outbox).
//!
//! Every local mutation lands here as an operation record, written in
//! the same atomic batch as the entity it mutates. The queue is the only
//! writer of operation status transitions; the state machine lives in
//! [`OpStatus::can_transition`] and every mark is idempotent.

use crate::error::{SyncError, SyncResult};
use setlog_core::{
    EntityKind, EntityRecord, EntityRef, Intent, LocalId, OpStatus, Operation, OperationId,
    UnixMillis,
};
use setlog_store::{LocalStore, WriteBatch};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// The durable outbox of pending mutations.
///
/// Operation ids are monotonic and recomputed from durable state at
/// startup, so the total order per entity survives a restart.
pub struct OperationQueue {
    store: Arc<dyn LocalStore>,
    next_id: AtomicU64,
}

impl OperationQueue {
    /// Opens the queue over a local store, recomputing the next
    /// operation id from the records already present.
    ///
    /// Operations left `InFlight` by a crashed process are reverted to
    /// `Pending` here: no driver owns them anymore, and an in-flight
    /// head would block its entity forever. The attempt is refunded;
    /// the idempotency token makes a repeated delivery harmless.
    pub fn open(store: Arc<dyn LocalStore>) -> SyncResult<Self> {
        let operations = store.list_operations()?;
        let max_id = operations.last().map(|op| op.id.as_u64()).unwrap_or(0);
        let queue = Self {
            store,
            next_id: AtomicU64::new(max_id + 1),
        };

        for op in operations {
            if op.status == OpStatus::InFlight {
                queue.revert_to_pending(op.id)?;
                debug!(op = %op.id, "reverted in-flight operation stranded by restart");
            }
        }

        Ok(queue)
    }

    /// The store this queue persists through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// All operation records, ordered by id ascending.
    pub fn operations(&self) -> SyncResult<Vec<Operation>> {
        Ok(self.store.list_operations()?)
    }

    /// Gets one operation record.
    pub fn operation(&self, id: OperationId) -> SyncResult<Option<Operation>> {
        Ok(self.store.get_operation(id)?)
    }

    fn allocate_id(&self) -> OperationId {
        OperationId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Enqueues a create: writes the new entity record and its `Pending`
    /// create operation in one atomic batch.
    pub fn enqueue_create(
        &self,
        record: EntityRecord,
        now: UnixMillis,
    ) -> SyncResult<OperationId> {
        let entity = record.entity_ref();
        if let Some(existing) = self.store.get_entity(record.kind, record.local_id)? {
            if existing.deleted {
                return Err(SyncError::EntityDeleted(entity));
            }
            return Err(SyncError::EntityExists(entity));
        }

        let id = self.allocate_id();
        let operation = Operation::new(
            id,
            record.kind,
            record.local_id,
            Intent::Create,
            record.payload.clone(),
            now,
        );

        let mut batch = WriteBatch::new();
        batch.put_entity(record).put_operation(operation);
        self.store.apply(batch)?;

        debug!(%entity, %id, "enqueued create");
        Ok(id)
    }

    /// Enqueues an update: replaces the entity record and appends a
    /// `Pending` update operation atomically.
    ///
    /// The stored remote identifier is preserved regardless of what the
    /// caller's record carries; the identity resolver is its only
    /// writer.
    pub fn enqueue_update(
        &self,
        mut record: EntityRecord,
        now: UnixMillis,
    ) -> SyncResult<OperationId> {
        let entity = record.entity_ref();
        let existing = self
            .store
            .get_entity(record.kind, record.local_id)?
            .ok_or(SyncError::EntityNotFound(entity))?;
        if existing.deleted {
            return Err(SyncError::EntityDeleted(entity));
        }

        record.remote_id = existing.remote_id;
        record.updated_at = now;

        let id = self.allocate_id();
        let operation = Operation::new(
            id,
            record.kind,
            record.local_id,
            Intent::Update,
            record.payload.clone(),
            now,
        );

        let mut batch = WriteBatch::new();
        batch.put_entity(record).put_operation(operation);
        self.store.apply(batch)?;

        debug!(%entity, %id, "enqueued update");
        Ok(id)
    }

    /// Enqueues a delete.
    ///
    /// A delete supersedes still-undelivered update operations for the
    /// same entity: they are hard-deleted from the queue. If the
    /// entity's create has never reached the remote store, the create,
    /// its updates, and the entity record itself are all purged and no
    /// delete is enqueued, since there is no remote record to remove;
    /// `Ok(None)` in that case. Otherwise the entity is tombstoned so
    /// the pending delete can still resolve its remote identifier.
    pub fn enqueue_delete(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        now: UnixMillis,
    ) -> SyncResult<Option<OperationId>> {
        let entity = EntityRef::new(kind, local_id);
        let mut record = self
            .store
            .get_entity(kind, local_id)?
            .ok_or(SyncError::EntityNotFound(entity))?;
        if record.deleted {
            return Err(SyncError::EntityDeleted(entity));
        }

        let ops = self.store.list_operations()?;
        let mut batch = WriteBatch::new();

        // Supersede undelivered updates enqueued before the delete.
        let mut cancelled = 0usize;
        for op in ops.iter().filter(|op| op.entity_ref() == entity) {
            if op.intent == Intent::Update
                && matches!(op.status, OpStatus::Pending | OpStatus::Retrying)
            {
                batch.delete_operation(op.id);
                cancelled += 1;
            }
        }

        // A create that was never delivered can be cancelled wholesale.
        let undelivered_create = record.remote_id.is_none()
            && ops.iter().any(|op| {
                op.entity_ref() == entity
                    && op.intent == Intent::Create
                    && matches!(
                        op.status,
                        OpStatus::Pending | OpStatus::Retrying | OpStatus::Failed
                    )
            });

        if undelivered_create {
            for op in ops.iter().filter(|op| op.entity_ref() == entity) {
                if op.status != OpStatus::Done {
                    batch.delete_operation(op.id);
                }
            }
            batch.delete_entity(kind, local_id);
            self.store.apply(batch)?;
            debug!(%entity, "cancelled undelivered create instead of deleting remotely");
            return Ok(None);
        }

        record.deleted = true;
        record.updated_at = now;

        let id = self.allocate_id();
        let operation = Operation::new(
            id,
            kind,
            local_id,
            Intent::Delete,
            serde_json::Value::Null,
            now,
        );
        batch.put_entity(record).put_operation(operation);
        self.store.apply(batch)?;

        debug!(%entity, %id, cancelled, "enqueued delete");
        Ok(Some(id))
    }

    /// Returns up to `max_n` dispatchable operations.
    ///
    /// For every entity only the lowest-id non-done operation is a
    /// candidate, and it is returned only while `Pending` or `Retrying`
    /// past its backoff window. An `InFlight` or `Failed` head blocks
    /// its successors, so per-entity order and mutual exclusion are
    /// structural. Results are ordered by operation id ascending.
    pub fn next_batch(&self, max_n: usize, now: UnixMillis) -> SyncResult<Vec<Operation>> {
        let mut seen: HashSet<EntityRef> = HashSet::new();
        let mut batch = Vec::new();

        for op in self.store.list_operations()? {
            if op.status == OpStatus::Done {
                continue;
            }
            // First non-done operation per entity is the head; later
            // ones wait behind it whatever its status.
            if !seen.insert(op.entity_ref()) {
                continue;
            }
            if op.is_eligible(now) {
                batch.push(op);
                if batch.len() == max_n {
                    break;
                }
            }
        }

        Ok(batch)
    }

    /// Marks an operation in flight, charging one attempt.
    pub fn mark_in_flight(&self, id: OperationId, now: UnixMillis) -> SyncResult<()> {
        self.transition(id, OpStatus::InFlight, |op| {
            op.attempts += 1;
            op.last_attempt_at = Some(now);
        })
    }

    /// Marks an operation done.
    pub fn mark_done(&self, id: OperationId) -> SyncResult<()> {
        self.transition(id, OpStatus::Done, |op| {
            op.last_error = None;
            op.next_attempt_at = None;
        })
    }

    /// Marks an operation failed (permanent error or attempts
    /// exhausted). The record is preserved for audit.
    pub fn mark_failed(&self, id: OperationId, error: impl Into<String>) -> SyncResult<()> {
        let error = error.into();
        self.transition(id, OpStatus::Failed, |op| {
            op.last_error = Some(error);
            op.next_attempt_at = None;
        })
    }

    /// Marks an operation retrying with its next eligibility time.
    pub fn mark_retrying(
        &self,
        id: OperationId,
        error: impl Into<String>,
        next_attempt_at: UnixMillis,
    ) -> SyncResult<()> {
        let error = error.into();
        self.transition(id, OpStatus::Retrying, |op| {
            op.last_error = Some(error);
            op.next_attempt_at = Some(next_attempt_at);
        })
    }

    /// Reverts an in-flight operation to `Pending` after a
    /// connectivity-loss cancellation. The attempt charged by
    /// [`OperationQueue::mark_in_flight`] is refunded; no backoff
    /// penalty applies.
    pub fn revert_to_pending(&self, id: OperationId) -> SyncResult<()> {
        self.transition(id, OpStatus::Pending, |op| {
            op.attempts = op.attempts.saturating_sub(1);
            op.next_attempt_at = None;
        })
    }

    /// Re-triggers a failed operation (`Failed -> Pending`). Attempt
    /// history is kept for diagnostics; eligibility is immediate.
    pub fn retrigger(&self, id: OperationId, auto: bool) -> SyncResult<()> {
        self.transition(id, OpStatus::Pending, |op| {
            op.next_attempt_at = None;
            if auto {
                op.auto_retried = true;
            }
        })
    }

    /// Hard-deletes a `Done` operation (garbage collection).
    ///
    /// Purging an already-absent operation is a no-op.
    pub fn purge(&self, id: OperationId) -> SyncResult<()> {
        let Some(op) = self.store.get_operation(id)? else {
            return Ok(());
        };
        if op.status != OpStatus::Done {
            return Err(SyncError::InvalidTransition {
                id,
                from: op.status,
                to: OpStatus::Done,
            });
        }
        let mut batch = WriteBatch::new();
        batch.delete_operation(id);
        self.store.apply(batch)?;
        Ok(())
    }

    /// Completes a delivered delete: removes the operation record and
    /// the entity tombstone in one atomic batch.
    pub fn complete_delete(&self, id: OperationId) -> SyncResult<()> {
        let Some(op) = self.store.get_operation(id)? else {
            return Ok(());
        };
        if !op.status.can_transition(OpStatus::Done) {
            return Err(SyncError::InvalidTransition {
                id,
                from: op.status,
                to: OpStatus::Done,
            });
        }
        let mut batch = WriteBatch::new();
        batch
            .delete_operation(id)
            .delete_entity(op.kind, op.local_id);
        self.store.apply(batch)?;
        debug!(entity = %op.entity_ref(), %id, "delete delivered, tombstone purged");
        Ok(())
    }

    /// Appends a fresh create operation for an entity that already
    /// exists locally. Reserved for the reconciler's stuck-entity
    /// repair; callers must have verified no active operation exists
    /// for the entity.
    pub(crate) fn requeue_create(
        &self,
        record: &EntityRecord,
        now: UnixMillis,
    ) -> SyncResult<OperationId> {
        let id = self.allocate_id();
        let operation = Operation::new(
            id,
            record.kind,
            record.local_id,
            Intent::Create,
            record.payload.clone(),
            now,
        );
        let mut batch = WriteBatch::new();
        batch.put_operation(operation);
        self.store.apply(batch)?;
        Ok(id)
    }

    /// Removes an operation record regardless of status. Reserved for
    /// the reconciler's orphan purge.
    pub(crate) fn force_remove(&self, id: OperationId) -> SyncResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete_operation(id);
        self.store.apply(batch)?;
        Ok(())
    }

    fn transition<F>(&self, id: OperationId, target: OpStatus, mutate: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Operation),
    {
        let mut op = self
            .store
            .get_operation(id)?
            .ok_or(SyncError::UnknownOperation(id))?;

        // Idempotent: re-marking the current status is a no-op.
        if op.status == target {
            return Ok(());
        }
        if !op.status.can_transition(target) {
            return Err(SyncError::InvalidTransition {
                id,
                from: op.status,
                to: target,
            });
        }

        mutate(&mut op);
        op.status = target;

        let mut batch = WriteBatch::new();
        batch.put_operation(op);
        self.store.apply(batch)?;
        Ok(())
    }
}
