//! Consistency sweep: orphan cleanup, stuck-entity self-healing, stale
//! failure surfacing, and done-operation garbage collection.

use crate::config::ReconcileConfig;
use crate::connectivity::ConnectivitySignal;
use crate::queue::OperationQueue;
use parking_lot::Mutex;
use setlog_core::{EntityRef, Intent, OpStatus, OperationId, UnixMillis};
use setlog_store::LocalStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one reconciliation pass found and did.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Operations purged because their entity no longer exists.
    pub orphans_purged: Vec<OperationId>,
    /// Terminal entities re-enqueued as fresh creates, with the new
    /// operation id.
    pub stuck_requeued: Vec<(EntityRef, OperationId)>,
    /// Failed operations past the grace period, surfaced for the host's
    /// "sync failed" indication.
    pub stale_failed: Vec<OperationId>,
    /// Stale failed operations re-triggered this pass.
    pub auto_retried: Vec<OperationId>,
    /// Done operations garbage-collected.
    pub done_purged: usize,
}

impl ReconcileReport {
    /// Returns true if the pass found nothing to repair or surface.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphans_purged.is_empty()
            && self.stuck_requeued.is_empty()
            && self.stale_failed.is_empty()
            && self.done_purged == 0
    }
}

/// The periodic/triggered consistency pass.
///
/// Runs on interval while foregrounded, on app resume, and on
/// reconnect. Never duplicates a remote record: a create is re-enqueued
/// only when no operation of any active status exists for the entity.
/// Sweeps are serialized against driver drains via the shared sweep
/// lock.
pub struct Reconciler {
    config: ReconcileConfig,
    store: Arc<dyn LocalStore>,
    queue: Arc<OperationQueue>,
    connectivity: ConnectivitySignal,
    sweep_lock: Arc<Mutex<()>>,
    last_pass_at: Mutex<Option<UnixMillis>>,
}

impl Reconciler {
    /// Creates a reconciler sharing the driver's sweep lock.
    pub fn new(
        config: ReconcileConfig,
        store: Arc<dyn LocalStore>,
        queue: Arc<OperationQueue>,
        connectivity: ConnectivitySignal,
        sweep_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            connectivity,
            sweep_lock,
            last_pass_at: Mutex::new(None),
        }
    }

    /// Time of the last completed pass, if any. In-memory only.
    #[must_use]
    pub fn last_pass_at(&self) -> Option<UnixMillis> {
        *self.last_pass_at.lock()
    }

    /// Runs one consistency pass.
    ///
    /// Local integrity problems are repaired or surfaced, never
    /// escalated: a record that cannot be repaired is logged and left
    /// for the next pass.
    pub fn reconcile(&self, now: UnixMillis) -> ReconcileReport {
        let _sweep = self.sweep_lock.lock();
        let mut report = ReconcileReport::default();

        let operations = match self.queue.operations() {
            Ok(ops) => ops,
            Err(e) => {
                warn!(error = %e, "reconcile pass aborted: cannot list operations");
                return report;
            }
        };
        let entities = match self.store.list_entities() {
            Ok(entities) => entities,
            Err(e) => {
                warn!(error = %e, "reconcile pass aborted: cannot list entities");
                return report;
            }
        };

        let entity_refs: HashSet<EntityRef> =
            entities.iter().map(|record| record.entity_ref()).collect();
        let mut active_ops: HashSet<EntityRef> = HashSet::new();
        for op in &operations {
            if op.status != OpStatus::Done {
                active_ops.insert(op.entity_ref());
            }
        }

        for op in &operations {
            match op.status {
                // The driver owns in-flight operations.
                OpStatus::InFlight => {}
                OpStatus::Done => {
                    let age = now.since(op.last_attempt_at.unwrap_or(op.created_at));
                    if age >= self.config.done_retention.as_millis() as u64 {
                        match self.queue.purge(op.id) {
                            Ok(()) => report.done_purged += 1,
                            Err(e) => warn!(op = %op.id, error = %e, "done purge failed"),
                        }
                    }
                }
                OpStatus::Pending | OpStatus::Retrying => {
                    // Orphan: the entity vanished before this ever sent.
                    // Deletes are exempt; their tombstone is the entity.
                    if op.intent != Intent::Delete && !entity_refs.contains(&op.entity_ref()) {
                        match self.queue.force_remove(op.id) {
                            Ok(()) => {
                                info!(op = %op.id, entity = %op.entity_ref(), "purged orphaned operation");
                                report.orphans_purged.push(op.id);
                            }
                            Err(e) => warn!(op = %op.id, error = %e, "orphan purge failed"),
                        }
                    }
                }
                OpStatus::Failed => {
                    let age = now.since(op.last_attempt_at.unwrap_or(op.created_at));
                    if age >= self.config.failed_grace.as_millis() as u64 {
                        report.stale_failed.push(op.id);
                        if self.config.auto_retry_failed
                            && !op.auto_retried
                            && self.connectivity.is_online()
                        {
                            match self.queue.retrigger(op.id, true) {
                                Ok(()) => {
                                    info!(op = %op.id, "auto-retrying stale failed operation");
                                    report.auto_retried.push(op.id);
                                }
                                Err(e) => warn!(op = %op.id, error = %e, "auto-retry failed"),
                            }
                        }
                    }
                }
            }
        }

        // Stuck entities: terminal, never synced, and nothing queued to
        // fix that. Re-enqueue a fresh create from the current payload.
        for record in &entities {
            let entity = record.entity_ref();
            if record.terminal
                && !record.deleted
                && record.remote_id.is_none()
                && !active_ops.contains(&entity)
            {
                match self.requeue_create(entity, now) {
                    Ok(op_id) => {
                        info!(%entity, op = %op_id, "re-enqueued create for stuck entity");
                        report.stuck_requeued.push((entity, op_id));
                    }
                    Err(e) => warn!(%entity, error = %e, "could not re-enqueue stuck entity"),
                }
            }
        }

        *self.last_pass_at.lock() = Some(now);
        debug!(
            orphans = report.orphans_purged.len(),
            stuck = report.stuck_requeued.len(),
            stale_failed = report.stale_failed.len(),
            purged = report.done_purged,
            "reconcile pass complete"
        );
        report
    }

    fn requeue_create(
        &self,
        entity: EntityRef,
        now: UnixMillis,
    ) -> crate::error::SyncResult<OperationId> {
        let record = self
            .store
            .get_entity(entity.kind, entity.local_id)?
            .ok_or(crate::error::SyncError::EntityNotFound(entity))?;
        self.queue.requeue_create(&record, now)
    }
}
