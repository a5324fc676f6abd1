//! Identity resolution: local id -> remote id backfill.

use crate::error::{SyncError, SyncResult};
use setlog_core::{EntityKind, EntityRef, LocalId, OpStatus, OperationId, RemoteId, UnixMillis};
use setlog_store::{LocalStore, WriteBatch};
use std::sync::Arc;
use tracing::debug;

/// Maps local-only entity identifiers to remote identifiers once the
/// remote store accepts their creation.
///
/// The resolver is the only writer of an entity's remote identifier. A
/// confirmed create is committed as one atomic batch, remote id onto the
/// entity record and `Done` onto the creating operation, so an entity can
/// never be observed with a done create but no remote id.
pub struct IdentityResolver {
    store: Arc<dyn LocalStore>,
}

impl IdentityResolver {
    /// Creates a resolver over the local store.
    #[must_use]
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Records the remote identifier returned by an accepted create and
    /// marks the creating operation done, atomically.
    ///
    /// Safe to call twice with the same arguments (retried delivery
    /// confirmations): a matching remote id is a no-op, a differing one
    /// is a [`SyncError::RemoteIdConflict`].
    pub fn resolve(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        remote_id: RemoteId,
        op_id: OperationId,
        now: UnixMillis,
    ) -> SyncResult<()> {
        let entity = EntityRef::new(kind, local_id);
        let mut record = self
            .store
            .get_entity(kind, local_id)?
            .ok_or(SyncError::EntityNotFound(entity))?;

        match &record.remote_id {
            Some(existing) if *existing == remote_id => {
                // Duplicate confirmation; make sure the op is closed out.
                self.close_create_op(op_id)?;
                return Ok(());
            }
            Some(existing) => {
                return Err(SyncError::RemoteIdConflict {
                    entity,
                    existing: existing.as_str().to_string(),
                    incoming: remote_id.as_str().to_string(),
                });
            }
            None => {}
        }

        record.remote_id = Some(remote_id.clone());
        record.updated_at = now;

        let mut batch = WriteBatch::new();
        batch.put_entity(record);

        if let Some(mut op) = self.store.get_operation(op_id)? {
            if op.status.can_transition(OpStatus::Done) {
                op.status = OpStatus::Done;
                op.last_error = None;
                op.next_attempt_at = None;
                batch.put_operation(op);
            }
        }

        self.store.apply(batch)?;
        debug!(%entity, %remote_id, %op_id, "remote id resolved");
        Ok(())
    }

    /// Looks up the remote identifier of an entity, if known.
    pub fn remote_id_of(&self, entity: EntityRef) -> SyncResult<Option<RemoteId>> {
        Ok(self
            .store
            .get_entity(entity.kind, entity.local_id)?
            .and_then(|record| record.remote_id))
    }

    fn close_create_op(&self, op_id: OperationId) -> SyncResult<()> {
        if let Some(mut op) = self.store.get_operation(op_id)? {
            if op.status != OpStatus::Done && op.status.can_transition(OpStatus::Done) {
                op.status = OpStatus::Done;
                op.last_error = None;
                op.next_attempt_at = None;
                let mut batch = WriteBatch::new();
                batch.put_operation(op);
                self.store.apply(batch)?;
            }
        }
        Ok(())
    }
}
