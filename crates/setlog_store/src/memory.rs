//! In-memory store backend.

use crate::backend::{LocalStore, WriteBatch, WriteOp};
use crate::error::StoreResult;
use parking_lot::RwLock;
use setlog_core::{EntityKind, EntityRecord, LocalId, Operation, OperationId};
use std::collections::BTreeMap;

/// An in-memory local store.
///
/// This backend keeps all records in memory and is suitable for:
/// - Unit and integration tests
/// - Ephemeral engines that don't need persistence
///
/// Batches are applied under a single write lock, which gives the
/// atomicity contract of [`LocalStore::apply`] directly.
///
/// # Thread Safety
///
/// The store is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entities: BTreeMap<(EntityKind, LocalId), EntityRecord>,
    operations: BTreeMap<OperationId, Operation>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity records currently held.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.inner.read().entities.len()
    }

    /// Number of operation records currently held.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.inner.read().operations.len()
    }
}

impl LocalStore for MemoryStore {
    fn get_entity(&self, kind: EntityKind, local_id: LocalId) -> StoreResult<Option<EntityRecord>> {
        Ok(self.inner.read().entities.get(&(kind, local_id)).cloned())
    }

    fn list_entities(&self) -> StoreResult<Vec<EntityRecord>> {
        Ok(self.inner.read().entities.values().cloned().collect())
    }

    fn get_operation(&self, id: OperationId) -> StoreResult<Option<Operation>> {
        Ok(self.inner.read().operations.get(&id).cloned())
    }

    fn list_operations(&self) -> StoreResult<Vec<Operation>> {
        // BTreeMap iteration already yields ascending operation ids.
        Ok(self.inner.read().operations.values().cloned().collect())
    }

    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for op in batch.ops() {
            match op {
                WriteOp::PutEntity(record) => {
                    inner
                        .entities
                        .insert((record.kind, record.local_id), record.clone());
                }
                WriteOp::DeleteEntity(kind, local_id) => {
                    inner.entities.remove(&(*kind, *local_id));
                }
                WriteOp::PutOperation(operation) => {
                    inner.operations.insert(operation.id, operation.clone());
                }
                WriteOp::DeleteOperation(id) => {
                    inner.operations.remove(id);
                }
            }
        }
        Ok(())
    }
}
