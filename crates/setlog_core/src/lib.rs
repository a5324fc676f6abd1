//! # Setlog Core
//!
//! Shared types and contracts for the Setlog sync engine.
//!
//! This crate defines:
//! - Entity kinds and identifiers (local and remote)
//! - Entity records as seen by the sync layer
//! - Durable operation records and their status state machine
//!
//! ## Key Invariants
//!
//! - A remote identifier, once set on an entity, is never reassigned or
//!   cleared except by explicit deletion
//! - Operation ids are monotonic and define total order within an entity
//! - Operation status moves forward only; `Done` is terminal

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod operation;
mod types;

pub use entity::EntityRecord;
pub use operation::{Intent, OpStatus, Operation};
pub use types::{EntityKind, EntityRef, LocalId, OperationId, RemoteId, UnixMillis};
