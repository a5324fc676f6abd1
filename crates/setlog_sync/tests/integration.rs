//! End-to-end tests for the sync engine over an in-memory store and a
//! mock transport.

use serde_json::json;
use setlog_core::{EntityKind, EntityRecord, Intent, OpStatus, UnixMillis};
use setlog_store::{LocalStore, MemoryStore, WriteBatch};
use setlog_sync::{
    ConnectivitySignal, IdentityResolver, MockTransport, OperationQueue, Reconciler,
    RemoteTransport, RetryConfig, SyncConfig, SyncDiagnostics, SyncDriver,
};
use std::sync::Arc;
use std::time::Duration;

struct Engine {
    store: Arc<MemoryStore>,
    queue: Arc<OperationQueue>,
    transport: Arc<MockTransport>,
    connectivity: ConnectivitySignal,
    driver: SyncDriver,
    reconciler: Reconciler,
    config: SyncConfig,
}

fn engine_with(config: SyncConfig) -> Engine {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn LocalStore> = Arc::clone(&store) as Arc<dyn LocalStore>;
    let queue = Arc::new(OperationQueue::open(Arc::clone(&dyn_store)).unwrap());
    let identity = Arc::new(IdentityResolver::new(Arc::clone(&dyn_store)));
    let transport = Arc::new(MockTransport::new());
    let connectivity = ConnectivitySignal::new(true);

    let driver = SyncDriver::new(
        config.clone(),
        Arc::clone(&dyn_store),
        Arc::clone(&queue),
        identity,
        Arc::clone(&transport) as Arc<dyn RemoteTransport>,
        connectivity.clone(),
    );
    let reconciler = Reconciler::new(
        config.reconcile.clone(),
        Arc::clone(&dyn_store),
        Arc::clone(&queue),
        connectivity.clone(),
        driver.sweep_lock(),
    );

    Engine {
        store,
        queue,
        transport,
        connectivity,
        driver,
        reconciler,
        config,
    }
}

fn engine() -> Engine {
    engine_with(SyncConfig::new().with_retry(RetryConfig::new(5).without_jitter()))
}

fn now() -> UnixMillis {
    UnixMillis::now()
}

#[test]
fn offline_queue_then_reconnect_delivers_in_order() {
    let e = engine();

    // Go offline before anything is queued.
    e.connectivity.set_online(false);

    // enqueue `create session S1`, then `update S1 sets`.
    let s1 = EntityRecord::new(EntityKind::Session, json!({"name": "S1"}), now());
    e.queue.enqueue_create(s1.clone(), now()).unwrap();
    let mut updated = s1.clone();
    updated.payload = json!({"name": "S1", "sets": 3});
    e.queue.enqueue_update(updated, now()).unwrap();

    // Nothing reaches the transport while offline.
    assert_eq!(e.driver.drain().dispatched, 0);
    assert_eq!(e.transport.call_count(), 0);

    // Reconnect: create first, then the update addressed to the
    // returned remote id.
    e.connectivity.set_online(true);
    let summary = e.driver.drain();
    assert_eq!(summary.completed, 2);

    let calls = e.transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].intent, Intent::Create);
    assert_eq!(calls[1].intent, Intent::Update);

    let stored = e.store.get_entity(s1.kind, s1.local_id).unwrap().unwrap();
    let remote_id = stored.remote_id.clone().expect("S1 must hold a remote id");
    assert_eq!(calls[1].remote_id, Some(remote_id.clone()));
    assert_eq!(
        e.transport.record_payload(&remote_id).unwrap(),
        json!({"name": "S1", "sets": 3})
    );

    // Diagnostics show both operations done.
    let diag = SyncDiagnostics::capture(e.store.as_ref(), &e.config.reconcile, now()).unwrap();
    assert!(diag.operations.iter().all(|op| op.status == OpStatus::Done));
    assert!(diag.is_settled());
}

#[test]
fn duplicate_delivery_has_single_effect() {
    let e = engine();

    let routine = EntityRecord::new(EntityKind::Routine, json!({"name": "5x5"}), now());
    let op_id = e.queue.enqueue_create(routine.clone(), now()).unwrap();

    // Simulate an earlier delivery whose confirmation was lost: the
    // remote store already processed this idempotency token.
    let first_remote = e
        .transport
        .create(EntityKind::Routine, op_id, &routine.payload)
        .unwrap();

    // The engine redelivers with the same token; the remote collapses
    // it and no duplicate record appears.
    let summary = e.driver.drain();
    assert_eq!(summary.completed, 1);
    assert_eq!(e.transport.record_count(), 1);

    let stored = e
        .store
        .get_entity(routine.kind, routine.local_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.remote_id, Some(first_remote));
}

#[test]
fn orphaned_operation_is_never_sent() {
    let e = engine();

    let set = EntityRecord::new(EntityKind::Set, json!({"reps": 10}), now());
    let op_id = e.queue.enqueue_create(set.clone(), now()).unwrap();

    // The entity vanishes before the operation is dispatched (simulated
    // partial failure outside the engine's delete path).
    let mut batch = WriteBatch::new();
    batch.delete_entity(set.kind, set.local_id);
    e.store.apply(batch).unwrap();

    let report = e.reconciler.reconcile(now());
    assert_eq!(report.orphans_purged, vec![op_id]);

    e.driver.drain();
    assert_eq!(e.transport.call_count(), 0);
}

#[test]
fn stuck_terminal_session_self_heals() {
    let e = engine();

    // A completed session whose enqueue was lost: entity present,
    // terminal, no remote id, no operations.
    let session = EntityRecord::new(EntityKind::Session, json!({"status": "completed"}), now())
        .with_terminal(true);
    let mut batch = WriteBatch::new();
    batch.put_entity(session.clone());
    e.store.apply(batch).unwrap();

    let report = e.reconciler.reconcile(now());
    assert_eq!(report.stuck_requeued.len(), 1);

    // A second pass must not enqueue another create.
    let report = e.reconciler.reconcile(now());
    assert!(report.stuck_requeued.is_empty());

    let summary = e.driver.drain();
    assert_eq!(summary.completed, 1);
    assert_eq!(e.transport.record_count(), 1);

    let stored = e
        .store
        .get_entity(session.kind, session.local_id)
        .unwrap()
        .unwrap();
    assert!(stored.remote_id.is_some());
}

#[test]
fn backoff_grows_monotonically_and_attempts_count_once() {
    let e = engine_with(
        SyncConfig::new().with_retry(
            RetryConfig::new(5)
                .with_initial_delay(Duration::from_millis(50))
                .with_max_delay(Duration::from_millis(200))
                .without_jitter(),
        ),
    );

    let profile = EntityRecord::new(EntityKind::Profile, json!({"name": "avery"}), now());
    let op_id = e.queue.enqueue_create(profile, now()).unwrap();
    e.transport.fail_next_transient(4, "server unavailable");

    let mut previous_delay = 0u64;
    for expected_attempts in 1..=4u32 {
        // Wait out the previous backoff so the head is eligible again.
        std::thread::sleep(Duration::from_millis(300));
        e.driver.drain();

        let op = e.queue.operation(op_id).unwrap().unwrap();
        assert_eq!(op.status, OpStatus::Retrying);
        assert_eq!(op.attempts, expected_attempts);

        let delay = op.next_attempt_at.unwrap().since(op.last_attempt_at.unwrap());
        assert!(
            delay >= previous_delay,
            "delay {delay}ms shrank below {previous_delay}ms"
        );
        previous_delay = delay;
    }

    // Fifth attempt succeeds.
    std::thread::sleep(Duration::from_millis(300));
    let summary = e.driver.drain();
    assert_eq!(summary.completed, 1);
    let op_gone_or_done = e.queue.operation(op_id).unwrap().unwrap();
    assert_eq!(op_gone_or_done.status, OpStatus::Done);
    assert_eq!(op_gone_or_done.attempts, 5);
}

#[test]
fn permanent_rejection_is_audited_not_retried() {
    let e = engine();

    let routine = EntityRecord::new(EntityKind::Routine, json!({}), now());
    let op_id = e.queue.enqueue_create(routine, now()).unwrap();
    e.transport.fail_next_permanent("unknown field 'tempo'");

    let summary = e.driver.drain();
    assert_eq!(summary.failed, 1);
    assert_eq!(e.transport.call_count(), 1);

    // The queue entry is preserved for audit, not silently dropped.
    let op = e.queue.operation(op_id).unwrap().unwrap();
    assert_eq!(op.status, OpStatus::Failed);
    assert!(op.last_error.as_deref().unwrap().contains("tempo"));

    // Surfaced through diagnostics once past the grace period.
    let later = UnixMillis(now().as_u64() + 600_000);
    let diag = SyncDiagnostics::capture(e.store.as_ref(), &e.config.reconcile, later).unwrap();
    assert_eq!(diag.stale_failed, vec![op_id]);
}

#[test]
fn full_lifecycle_with_delete() {
    let e = engine();

    let session = EntityRecord::new(EntityKind::Session, json!({"name": "legs"}), now());
    e.queue.enqueue_create(session.clone(), now()).unwrap();
    e.driver.drain();

    let remote_id = e
        .store
        .get_entity(session.kind, session.local_id)
        .unwrap()
        .unwrap()
        .remote_id
        .unwrap();
    assert!(e.transport.has_record(&remote_id));

    e.queue
        .enqueue_delete(session.kind, session.local_id, now())
        .unwrap()
        .expect("synced entity delete must enqueue");
    let summary = e.driver.drain();
    assert_eq!(summary.completed, 1);

    // Remote record gone, local tombstone purged, nothing left behind.
    assert!(!e.transport.has_record(&remote_id));
    assert!(e
        .store
        .get_entity(session.kind, session.local_id)
        .unwrap()
        .is_none());

    let diag = SyncDiagnostics::capture(e.store.as_ref(), &e.config.reconcile, now()).unwrap();
    assert!(diag.entities.is_empty());
    assert!(diag.orphaned.is_empty());
}

#[test]
fn dependent_set_waits_for_session_identity() {
    let e = engine();

    let session = EntityRecord::new(EntityKind::Session, json!({"name": "pull"}), now());
    let session_create = e.queue.enqueue_create(session.clone(), now()).unwrap();

    let set = EntityRecord::new(EntityKind::Set, json!({"reps": 5, "weight": 100}), now())
        .with_parent(session.entity_ref());
    e.queue.enqueue_create(set.clone(), now()).unwrap();

    // Pin the session create in flight so the set cannot resolve its
    // parent; the set must be deferred, not failed.
    e.queue.mark_in_flight(session_create, now()).unwrap();
    let summary = e.driver.drain();
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(e.transport.call_count(), 0);

    // Release the create and let the whole chain settle.
    e.queue.revert_to_pending(session_create).unwrap();
    let summary = e.driver.drain();
    assert_eq!(summary.completed, 2);

    let session_remote = e
        .store
        .get_entity(session.kind, session.local_id)
        .unwrap()
        .unwrap()
        .remote_id
        .unwrap();
    let set_call = e
        .transport
        .calls()
        .into_iter()
        .find(|call| call.kind == EntityKind::Set)
        .unwrap();
    assert_eq!(
        set_call.payload.unwrap()["session_id"],
        json!(session_remote.as_str())
    );
}

#[test]
fn crash_between_sessions_resumes_from_durable_state() {
    // First process lifetime: queue work, deliver some of it.
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn LocalStore> = Arc::clone(&store) as Arc<dyn LocalStore>;

    let session = EntityRecord::new(EntityKind::Session, json!({"name": "am"}), now());
    let mut second = EntityRecord::new(EntityKind::Session, json!({"name": "pm"}), now());
    second.terminal = true;

    {
        let queue = Arc::new(OperationQueue::open(Arc::clone(&dyn_store)).unwrap());
        queue.enqueue_create(session.clone(), now()).unwrap();
        queue.enqueue_create(second.clone(), now()).unwrap();
        // Process "crashes" here: nothing dispatched.
    }

    // Second lifetime: a fresh queue over the same store sees the same
    // operations and continues the id sequence.
    let queue = Arc::new(OperationQueue::open(Arc::clone(&dyn_store)).unwrap());
    let identity = Arc::new(IdentityResolver::new(Arc::clone(&dyn_store)));
    let transport = Arc::new(MockTransport::new());
    let connectivity = ConnectivitySignal::new(true);
    let driver = SyncDriver::new(
        SyncConfig::new().with_retry(RetryConfig::new(3).without_jitter()),
        Arc::clone(&dyn_store),
        Arc::clone(&queue),
        identity,
        Arc::clone(&transport) as Arc<dyn RemoteTransport>,
        connectivity,
    );

    let summary = driver.drain();
    assert_eq!(summary.completed, 2);
    assert!(store
        .get_entity(session.kind, session.local_id)
        .unwrap()
        .unwrap()
        .remote_id
        .is_some());

    let next = queue
        .enqueue_update(second.clone(), now())
        .unwrap();
    assert_eq!(next.as_u64(), 3);
}

#[test]
fn crash_while_in_flight_recovers_on_restart() {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn LocalStore> = Arc::clone(&store) as Arc<dyn LocalStore>;

    let session = EntityRecord::new(EntityKind::Session, json!({"name": "rows"}), now());
    let update_id;
    {
        let queue = Arc::new(OperationQueue::open(Arc::clone(&dyn_store)).unwrap());
        let create_id = queue.enqueue_create(session.clone(), now()).unwrap();
        update_id = queue.enqueue_update(session.clone(), now()).unwrap();
        // The create goes on the wire and the process dies before any
        // confirmation lands.
        queue.mark_in_flight(create_id, now()).unwrap();
    }

    // Restart: a fresh queue, driver, and reconciler over the same
    // durable state must redeliver the create and drain the backlog.
    let queue = Arc::new(OperationQueue::open(Arc::clone(&dyn_store)).unwrap());
    let identity = Arc::new(IdentityResolver::new(Arc::clone(&dyn_store)));
    let transport = Arc::new(MockTransport::new());
    let connectivity = ConnectivitySignal::new(true);
    let driver = SyncDriver::new(
        SyncConfig::new().with_retry(RetryConfig::new(3).without_jitter()),
        Arc::clone(&dyn_store),
        Arc::clone(&queue),
        identity,
        Arc::clone(&transport) as Arc<dyn RemoteTransport>,
        connectivity.clone(),
    );
    let reconciler = Reconciler::new(
        SyncConfig::new().reconcile,
        Arc::clone(&dyn_store),
        Arc::clone(&queue),
        connectivity,
        driver.sweep_lock(),
    );

    assert!(reconciler.reconcile(now()).is_clean());
    let summary = driver.drain();
    assert_eq!(summary.completed, 2);
    assert_eq!(transport.record_count(), 1);

    let stored = store
        .get_entity(session.kind, session.local_id)
        .unwrap()
        .unwrap();
    assert!(stored.remote_id.is_some());
    assert_eq!(
        queue.operation(update_id).unwrap().unwrap().status,
        OpStatus::Done
    );
}

#[test]
fn mid_drain_disconnect_stops_transport_calls() {
    // A transport that kills the link on its first call.
    struct FlakyLink {
        inner: MockTransport,
        connectivity: ConnectivitySignal,
        drop_on_first: std::sync::atomic::AtomicBool,
    }

    impl RemoteTransport for FlakyLink {
        fn create(
            &self,
            kind: EntityKind,
            token: setlog_core::OperationId,
            payload: &serde_json::Value,
        ) -> setlog_sync::SyncResult<setlog_core::RemoteId> {
            if self.drop_on_first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.connectivity.set_online(false);
                return Err(setlog_sync::SyncError::Timeout);
            }
            self.inner.create(kind, token, payload)
        }

        fn update(
            &self,
            kind: EntityKind,
            remote_id: &setlog_core::RemoteId,
            token: setlog_core::OperationId,
            payload: &serde_json::Value,
        ) -> setlog_sync::SyncResult<()> {
            self.inner.update(kind, remote_id, token, payload)
        }

        fn delete(
            &self,
            kind: EntityKind,
            remote_id: &setlog_core::RemoteId,
            token: setlog_core::OperationId,
        ) -> setlog_sync::SyncResult<()> {
            self.inner.delete(kind, remote_id, token)
        }
    }

    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn LocalStore> = Arc::clone(&store) as Arc<dyn LocalStore>;
    let queue = Arc::new(OperationQueue::open(Arc::clone(&dyn_store)).unwrap());
    let identity = Arc::new(IdentityResolver::new(Arc::clone(&dyn_store)));
    let connectivity = ConnectivitySignal::new(true);
    let transport = Arc::new(FlakyLink {
        inner: MockTransport::new(),
        connectivity: connectivity.clone(),
        drop_on_first: std::sync::atomic::AtomicBool::new(true),
    });
    let driver = SyncDriver::new(
        SyncConfig::new()
            .with_max_in_flight(1)
            .with_retry(RetryConfig::new(3).without_jitter()),
        Arc::clone(&dyn_store),
        Arc::clone(&queue),
        identity,
        Arc::clone(&transport) as Arc<dyn RemoteTransport>,
        connectivity.clone(),
    );

    let a = EntityRecord::new(EntityKind::Session, json!({"n": 1}), now());
    let b = EntityRecord::new(EntityKind::Session, json!({"n": 2}), now());
    let first = queue.enqueue_create(a, now()).unwrap();
    queue.enqueue_create(b, now()).unwrap();

    let summary = driver.drain();
    // The failed call reverted without penalty and the second entity
    // was never attempted.
    assert_eq!(summary.reverted, 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(transport.inner.call_count(), 0);

    let op = queue.operation(first).unwrap().unwrap();
    assert_eq!(op.status, OpStatus::Pending);
    assert_eq!(op.attempts, 0);

    // Reconnect and everything drains.
    connectivity.set_online(true);
    assert_eq!(driver.drain().completed, 2);
}
