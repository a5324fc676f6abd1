//! # Setlog Store
//!
//! Local store interface and in-memory backend for the Setlog sync
//! engine.
//!
//! The sync engine treats on-device storage as a generic keyed store
//! holding two record families: domain entities and queued operations.
//! All mutations go through [`LocalStore::apply`] with a [`WriteBatch`],
//! which the backend must commit atomically; this is what makes an
//! entity write and its operation enqueue indivisible.
//!
//! ## Thread Safety
//!
//! Implementations must be shareable across threads; the driver reads
//! and writes from dispatch threads while UI-triggered writes land
//! concurrently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{LocalStore, WriteBatch, WriteOp};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
