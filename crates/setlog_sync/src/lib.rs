//! # Setlog Sync Engine
//!
//! Offline-first synchronization engine for Setlog.
//!
//! This crate provides:
//! - Durable operation queue (outbox) with a crash-safe status machine
//! - Sync driver with per-entity ordering, bounded fan-out, and
//!   exponential backoff
//! - Identity resolver mapping local ids to remote ids transactionally
//! - Reconciler for orphan cleanup, stuck-entity self-healing, and
//!   stale-failure surfacing
//! - Remote transport abstraction with idempotency tokens
//! - Read-only diagnostics snapshot
//!
//! ## Architecture
//!
//! A user action mutates an entity in the local store and atomically
//! appends an operation to the queue. The driver drains the queue while
//! connectivity holds, one in-flight operation per entity at a time;
//! accepted creates feed the identity resolver, which backfills the
//! remote identifier onto the entity in the same transaction that marks
//! the create done. The reconciler runs on interval or trigger and
//! repairs divergence without user intervention.
//!
//! ## Key Invariants
//!
//! - Operations for one entity reach the transport in operation-id order
//! - Repeated delivery never duplicates a remote record (the operation
//!   id is the idempotency token)
//! - Crash or connectivity loss at any point leaves every operation in a
//!   recoverable status
//! - Nothing in this engine propagates transport errors to the caller;
//!   sync health is observed through diagnostics

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod diagnostics;
mod driver;
mod error;
mod identity;
mod queue;
mod reconciler;
mod transport;

pub use config::{ReconcileConfig, RetryConfig, SyncConfig};
pub use connectivity::ConnectivitySignal;
pub use diagnostics::{EntitySyncState, EntityView, OperationView, SyncDiagnostics};
pub use driver::{DrainSummary, DriverStats, SyncDriver};
pub use error::{SyncError, SyncResult};
pub use identity::IdentityResolver;
pub use queue::OperationQueue;
pub use reconciler::{ReconcileReport, Reconciler};
pub use transport::{MockTransport, RemoteTransport, TransportCall};
