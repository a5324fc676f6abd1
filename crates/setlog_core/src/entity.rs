//! Entity records as seen by the sync layer.

use crate::types::{EntityKind, EntityRef, LocalId, RemoteId, UnixMillis};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A synchronizable domain entity record.
///
/// The sync layer treats the domain payload as an opaque JSON value; it
/// only cares about identity, parentage, and lifecycle flags.
///
/// # Invariants
///
/// - `remote_id`, once set, is never reassigned or cleared except by
///   explicit deletion of the entity
/// - `deleted` entities are tombstones: they exist only so a pending
///   delete operation can still resolve the remote identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity kind.
    pub kind: EntityKind,
    /// Local identifier, assigned at creation time.
    pub local_id: LocalId,
    /// Remote identifier, present only after the remote store accepted
    /// the entity's create.
    pub remote_id: Option<RemoteId>,
    /// Domain payload snapshot.
    pub payload: Value,
    /// Parent entity, if this kind is owned by another (a set belongs to
    /// a session, a session to a routine).
    pub parent: Option<EntityRef>,
    /// Whether the entity has reached a terminal local state (e.g. a
    /// completed or abandoned session).
    pub terminal: bool,
    /// Tombstone flag set when a local delete is pending remotely.
    pub deleted: bool,
    /// Last local mutation time.
    pub updated_at: UnixMillis,
}

impl EntityRecord {
    /// Creates a new local-only record with a fresh local identifier.
    #[must_use]
    pub fn new(kind: EntityKind, payload: Value, now: UnixMillis) -> Self {
        Self {
            kind,
            local_id: LocalId::new(),
            remote_id: None,
            payload,
            parent: None,
            terminal: false,
            deleted: false,
            updated_at: now,
        }
    }

    /// Sets the parent entity.
    #[must_use]
    pub fn with_parent(mut self, parent: EntityRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Marks the record terminal.
    #[must_use]
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    /// The (kind, local id) reference for this record.
    #[must_use]
    pub const fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.local_id)
    }

    /// Returns true if the remote store has accepted this entity.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.remote_id.is_some()
    }
}
