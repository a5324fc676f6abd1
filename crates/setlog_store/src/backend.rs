//! Local store trait and atomic write batches.

use crate::error::StoreResult;
use setlog_core::{EntityKind, EntityRecord, LocalId, Operation, OperationId};

/// A single mutation within a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or replace an entity record.
    PutEntity(EntityRecord),
    /// Remove an entity record.
    DeleteEntity(EntityKind, LocalId),
    /// Insert or replace an operation record.
    PutOperation(Operation),
    /// Remove an operation record.
    DeleteOperation(OperationId),
}

/// An ordered list of mutations committed atomically.
///
/// Backends apply the whole batch or none of it. The sync engine relies
/// on this for every compound invariant: entity mutation + enqueue,
/// remote-id backfill + create completion, delete supersession.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity put.
    pub fn put_entity(&mut self, record: EntityRecord) -> &mut Self {
        self.ops.push(WriteOp::PutEntity(record));
        self
    }

    /// Adds an entity delete.
    pub fn delete_entity(&mut self, kind: EntityKind, local_id: LocalId) -> &mut Self {
        self.ops.push(WriteOp::DeleteEntity(kind, local_id));
        self
    }

    /// Adds an operation put.
    pub fn put_operation(&mut self, operation: Operation) -> &mut Self {
        self.ops.push(WriteOp::PutOperation(operation));
        self
    }

    /// Adds an operation delete.
    pub fn delete_operation(&mut self, id: OperationId) -> &mut Self {
        self.ops.push(WriteOp::DeleteOperation(id));
        self
    }

    /// Returns the mutations in application order.
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Returns true if the batch contains no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of mutations in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Durable on-device keyed storage for entities and queued operations.
///
/// The engine is the only writer; reads may happen concurrently from
/// dispatch threads. Implementations must make [`LocalStore::apply`]
/// atomic with respect to every other method.
pub trait LocalStore: Send + Sync {
    /// Gets an entity record by (kind, local id).
    fn get_entity(&self, kind: EntityKind, local_id: LocalId) -> StoreResult<Option<EntityRecord>>;

    /// Returns all entity records.
    fn list_entities(&self) -> StoreResult<Vec<EntityRecord>>;

    /// Gets an operation record by id.
    fn get_operation(&self, id: OperationId) -> StoreResult<Option<Operation>>;

    /// Returns all operation records ordered by operation id ascending.
    fn list_operations(&self) -> StoreResult<Vec<Operation>>;

    /// Commits a write batch atomically.
    fn apply(&self, batch: WriteBatch) -> StoreResult<()>;
}
