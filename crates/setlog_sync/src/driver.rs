//! The sync driver: drains the outbox while connectivity holds.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivitySignal;
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityResolver;
use crate::queue::OperationQueue;
use crate::transport::RemoteTransport;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use setlog_core::{Intent, OpStatus, Operation, RemoteId, UnixMillis};
use setlog_store::LocalStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Counters for one `drain` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Operations handed to the transport.
    pub dispatched: u64,
    /// Operations that completed (done or delete-purged).
    pub completed: u64,
    /// Operations scheduled for retry with backoff.
    pub retried: u64,
    /// Operations marked failed.
    pub failed: u64,
    /// Operations skipped because a required remote id is not yet known.
    pub deferred: u64,
    /// In-flight operations reverted to pending by connectivity loss.
    pub reverted: u64,
    /// Earliest retry eligibility among waiting operations, if any:
    /// a wake-up hint for the host scheduler.
    pub next_attempt_at: Option<UnixMillis>,
}

/// Process-wide sync session state. In-memory only; recomputed from the
/// durable queue on restart.
#[derive(Debug, Clone, Default)]
pub struct DriverStats {
    /// Completed drain invocations.
    pub drains: u64,
    /// Total operations dispatched to the transport.
    pub dispatched: u64,
    /// Total operations completed.
    pub completed: u64,
    /// Total retries scheduled.
    pub retried: u64,
    /// Total operations failed.
    pub failed: u64,
    /// Time of the last drain.
    pub last_drain_at: Option<UnixMillis>,
    /// Most recent delivery error observed.
    pub last_error: Option<String>,
}

enum PlanAction {
    Create { payload: Value },
    Update { remote_id: RemoteId, payload: Value },
    Delete { remote_id: RemoteId },
}

struct Plan {
    op: Operation,
    action: PlanAction,
}

enum Outcome {
    Created(RemoteId),
    Applied,
}

enum Planned {
    Dispatch(Plan),
    /// Required remote id not yet known; try again later.
    Defer,
    /// Local integrity problem that makes dispatch pointless.
    FailLocal(String),
}

/// The control loop that delivers queued operations to the remote store.
///
/// One driver instance runs per process; invoking [`SyncDriver::drain`]
/// while a drain is already running is a no-op. Transport errors never
/// escape the driver; callers observe progress through the returned
/// [`DrainSummary`], [`DriverStats`], and the diagnostics snapshot.
pub struct SyncDriver {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    queue: Arc<OperationQueue>,
    identity: Arc<IdentityResolver>,
    transport: Arc<dyn RemoteTransport>,
    connectivity: ConnectivitySignal,
    sweep_lock: Arc<Mutex<()>>,
    running: AtomicBool,
    stats: RwLock<DriverStats>,
}

impl SyncDriver {
    /// Creates a new driver.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        queue: Arc<OperationQueue>,
        identity: Arc<IdentityResolver>,
        transport: Arc<dyn RemoteTransport>,
        connectivity: ConnectivitySignal,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            identity,
            transport,
            connectivity,
            sweep_lock: Arc::new(Mutex::new(())),
            running: AtomicBool::new(false),
            stats: RwLock::new(DriverStats::default()),
        }
    }

    /// The lock serializing driver drains and reconciler sweeps.
    #[must_use]
    pub fn sweep_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.sweep_lock)
    }

    /// Current session stats.
    #[must_use]
    pub fn stats(&self) -> DriverStats {
        self.stats.read().clone()
    }

    /// Drains eligible operations until the queue is quiet or
    /// connectivity drops.
    ///
    /// Re-entrant-safe: a second caller while a drain is running gets an
    /// empty summary immediately.
    pub fn drain(&self) -> DrainSummary {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("drain already running, ignoring re-invocation");
            return DrainSummary::default();
        }

        let summary = self.drain_inner();

        {
            let mut stats = self.stats.write();
            stats.drains += 1;
            stats.dispatched += summary.dispatched;
            stats.completed += summary.completed;
            stats.retried += summary.retried;
            stats.failed += summary.failed;
            stats.last_drain_at = Some(UnixMillis::now());
        }
        self.running.store(false, Ordering::SeqCst);
        summary
    }

    fn drain_inner(&self) -> DrainSummary {
        let mut summary = DrainSummary::default();

        loop {
            if !self.connectivity.is_online() {
                debug!("offline, pausing drain");
                break;
            }

            let _sweep = self.sweep_lock.lock();
            let now = UnixMillis::now();

            let batch = match self.queue.next_batch(self.config.max_in_flight, now) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "failed to read next batch");
                    break;
                }
            };
            if batch.is_empty() {
                summary.next_attempt_at = self.earliest_retry();
                break;
            }

            let mut plans = Vec::new();
            for op in batch {
                match self.plan(&op) {
                    Ok(Planned::Dispatch(plan)) => plans.push(plan),
                    Ok(Planned::Defer) => {
                        summary.deferred += 1;
                    }
                    Ok(Planned::FailLocal(reason)) => {
                        warn!(op = %op.id, %reason, "failing undeliverable operation");
                        if let Err(e) = self.fail_local(&op, &reason, now) {
                            warn!(op = %op.id, error = %e, "could not mark operation failed");
                        }
                        summary.failed += 1;
                    }
                    Err(e) => {
                        warn!(op = %op.id, error = %e, "planning failed, skipping");
                        summary.deferred += 1;
                    }
                }
            }

            if plans.is_empty() {
                // Everything eligible is waiting on an identity; nothing
                // to send this pass.
                summary.next_attempt_at = self.earliest_retry();
                break;
            }

            for plan in &plans {
                if let Err(e) = self.queue.mark_in_flight(plan.op.id, now) {
                    warn!(op = %plan.op.id, error = %e, "could not mark in flight");
                }
            }

            let results: Vec<(usize, SyncResult<Outcome>)> = thread::scope(|scope| {
                let handles: Vec<_> = plans
                    .iter()
                    .enumerate()
                    .map(|(index, plan)| (index, scope.spawn(move || self.send(plan))))
                    .collect();

                handles
                    .into_iter()
                    .map(|(index, handle)| {
                        let outcome = handle.join().unwrap_or_else(|_| {
                            Err(SyncError::transport_retryable("dispatch panicked"))
                        });
                        (index, outcome)
                    })
                    .collect()
            });

            summary.dispatched += plans.len() as u64;

            let now = UnixMillis::now();
            for (index, outcome) in results {
                let op = &plans[index].op;
                if let Err(e) = self.settle(op, outcome, now, &mut summary) {
                    warn!(op = %op.id, error = %e, "failed to record dispatch outcome");
                }
            }
        }

        summary
    }

    /// Decides how (and whether) an operation can be sent right now.
    fn plan(&self, op: &Operation) -> SyncResult<Planned> {
        let record = self.store.get_entity(op.kind, op.local_id)?;

        match op.intent {
            Intent::Create => {
                let Some(record) = record else {
                    // Entity vanished before its create synced; the
                    // reconciler purges these.
                    return Ok(Planned::Defer);
                };
                let mut payload = op.payload.clone();
                if let Some(parent) = record.parent {
                    match self.identity.remote_id_of(parent)? {
                        Some(parent_remote) => {
                            if let Value::Object(map) = &mut payload {
                                map.insert(
                                    parent.kind.remote_ref_field().to_string(),
                                    Value::String(parent_remote.as_str().to_string()),
                                );
                            }
                        }
                        None => {
                            if self.store.get_entity(parent.kind, parent.local_id)?.is_none() {
                                return Ok(Planned::FailLocal(format!(
                                    "parent entity {parent} missing locally"
                                )));
                            }
                            // Parent create not confirmed yet.
                            return Ok(Planned::Defer);
                        }
                    }
                }
                Ok(Planned::Dispatch(Plan {
                    op: op.clone(),
                    action: PlanAction::Create { payload },
                }))
            }
            Intent::Update => {
                let Some(record) = record else {
                    return Ok(Planned::Defer);
                };
                match record.remote_id {
                    Some(remote_id) => Ok(Planned::Dispatch(Plan {
                        op: op.clone(),
                        action: PlanAction::Update {
                            remote_id,
                            payload: op.payload.clone(),
                        },
                    })),
                    None => Ok(Planned::Defer),
                }
            }
            Intent::Delete => {
                let Some(record) = record else {
                    return Ok(Planned::Defer);
                };
                match record.remote_id {
                    Some(remote_id) => Ok(Planned::Dispatch(Plan {
                        op: op.clone(),
                        action: PlanAction::Delete { remote_id },
                    })),
                    None => Ok(Planned::Defer),
                }
            }
        }
    }

    fn send(&self, plan: &Plan) -> SyncResult<Outcome> {
        match &plan.action {
            PlanAction::Create { payload } => self
                .transport
                .create(plan.op.kind, plan.op.id, payload)
                .map(Outcome::Created),
            PlanAction::Update { remote_id, payload } => self
                .transport
                .update(plan.op.kind, remote_id, plan.op.id, payload)
                .map(|()| Outcome::Applied),
            PlanAction::Delete { remote_id } => self
                .transport
                .delete(plan.op.kind, remote_id, plan.op.id)
                .map(|()| Outcome::Applied),
        }
    }

    fn settle(
        &self,
        op: &Operation,
        outcome: SyncResult<Outcome>,
        now: UnixMillis,
        summary: &mut DrainSummary,
    ) -> SyncResult<()> {
        match outcome {
            Ok(Outcome::Created(remote_id)) => {
                self.identity
                    .resolve(op.kind, op.local_id, remote_id, op.id, now)?;
                summary.completed += 1;
                info!(op = %op.id, entity = %op.entity_ref(), "create delivered");
            }
            Ok(Outcome::Applied) => {
                match op.intent {
                    Intent::Delete => self.queue.complete_delete(op.id)?,
                    _ => self.queue.mark_done(op.id)?,
                }
                summary.completed += 1;
                info!(op = %op.id, entity = %op.entity_ref(), intent = ?op.intent, "operation delivered");
            }
            Err(error) => {
                self.stats.write().last_error = Some(error.to_string());

                if !self.connectivity.is_online() {
                    // Connectivity was lost mid-flight; no penalty.
                    self.queue.revert_to_pending(op.id)?;
                    summary.reverted += 1;
                    debug!(op = %op.id, "reverted to pending after connectivity loss");
                } else if error.is_retryable() {
                    let charged = self
                        .queue
                        .operation(op.id)?
                        .map(|current| current.attempts)
                        .unwrap_or(op.attempts + 1);
                    if charged >= self.config.retry.max_attempts {
                        self.queue.mark_failed(op.id, error.to_string())?;
                        summary.failed += 1;
                        warn!(op = %op.id, attempts = charged, "attempts exhausted, marked failed");
                    } else {
                        let delay = self.config.retry.delay_for_attempt(charged);
                        let next = now.plus(delay.as_millis() as u64);
                        self.queue.mark_retrying(op.id, error.to_string(), next)?;
                        summary.retried += 1;
                        debug!(op = %op.id, attempts = charged, delay_ms = delay.as_millis() as u64, "retry scheduled");
                    }
                } else {
                    self.queue.mark_failed(op.id, error.to_string())?;
                    summary.failed += 1;
                    warn!(op = %op.id, error = %error, "permanent failure");
                }
            }
        }
        Ok(())
    }

    /// Marks an operation failed without a transport attempt. The
    /// in-flight hop keeps the status machine honest.
    fn fail_local(&self, op: &Operation, reason: &str, now: UnixMillis) -> SyncResult<()> {
        self.queue.mark_in_flight(op.id, now)?;
        self.queue.mark_failed(op.id, reason)
    }

    fn earliest_retry(&self) -> Option<UnixMillis> {
        self.queue
            .operations()
            .ok()?
            .iter()
            .filter(|op| op.status == OpStatus::Retrying)
            .filter_map(|op| op.next_attempt_at)
            .min()
    }
}
