//! Remote transport abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde_json::Value;
use setlog_core::{EntityKind, Intent, OperationId, RemoteId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Thin interface to the remote store's network API.
///
/// Every call carries the operation id as an idempotency token; the
/// remote side is expected to collapse duplicate deliveries of the same
/// token into a no-op success. Implementations must be shareable across
/// the driver's dispatch threads.
pub trait RemoteTransport: Send + Sync {
    /// Creates an entity remotely, returning its remote identifier.
    fn create(&self, kind: EntityKind, token: OperationId, payload: &Value)
        -> SyncResult<RemoteId>;

    /// Updates an entity by remote identifier.
    fn update(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
        token: OperationId,
        payload: &Value,
    ) -> SyncResult<()>;

    /// Deletes an entity by remote identifier.
    fn delete(&self, kind: EntityKind, remote_id: &RemoteId, token: OperationId) -> SyncResult<()>;
}

/// One observed transport invocation (mock bookkeeping).
#[derive(Debug, Clone)]
pub struct TransportCall {
    /// Idempotency token (operation id).
    pub token: OperationId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Which endpoint was hit.
    pub intent: Intent,
    /// Remote id addressed, for update/delete.
    pub remote_id: Option<RemoteId>,
    /// Payload sent, for create/update.
    pub payload: Option<Value>,
}

#[derive(Debug, Clone)]
enum PlannedFailure {
    Transient(String),
    Permanent(String),
    Timeout,
}

impl PlannedFailure {
    fn into_error(self) -> SyncError {
        match self {
            PlannedFailure::Transient(message) => SyncError::transport_retryable(message),
            PlannedFailure::Permanent(message) => SyncError::Rejected(message),
            PlannedFailure::Timeout => SyncError::Timeout,
        }
    }
}

/// A mock transport for testing.
///
/// Records every call, honors the idempotency contract (a repeated token
/// is a no-op success returning the original result), and can be scripted
/// to fail upcoming calls transiently or permanently.
#[derive(Debug, Default)]
pub struct MockTransport {
    calls: Mutex<Vec<TransportCall>>,
    /// Token -> result of the first successful delivery.
    seen: Mutex<HashMap<OperationId, Option<RemoteId>>>,
    /// Remote records by id, to assert duplicate-free creation.
    records: Mutex<HashMap<RemoteId, (EntityKind, Value)>>,
    planned: Mutex<VecDeque<PlannedFailure>>,
    next_remote: AtomicU64,
}

impl MockTransport {
    /// Creates a new mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next `count` calls to fail transiently.
    pub fn fail_next_transient(&self, count: usize, message: impl Into<String>) {
        let message = message.into();
        let mut planned = self.planned.lock();
        for _ in 0..count {
            planned.push_back(PlannedFailure::Transient(message.clone()));
        }
    }

    /// Scripts the next call to fail permanently (payload rejected).
    pub fn fail_next_permanent(&self, message: impl Into<String>) {
        self.planned
            .lock()
            .push_back(PlannedFailure::Permanent(message.into()));
    }

    /// Scripts the next `count` calls to time out.
    pub fn fail_next_timeout(&self, count: usize) {
        let mut planned = self.planned.lock();
        for _ in 0..count {
            planned.push_back(PlannedFailure::Timeout);
        }
    }

    /// Returns all observed calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Number of observed calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of remote records currently held.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if a remote record with this id exists.
    #[must_use]
    pub fn has_record(&self, remote_id: &RemoteId) -> bool {
        self.records.lock().contains_key(remote_id)
    }

    /// The payload most recently stored for a remote record.
    #[must_use]
    pub fn record_payload(&self, remote_id: &RemoteId) -> Option<Value> {
        self.records.lock().get(remote_id).map(|(_, p)| p.clone())
    }

    fn record_call(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn take_planned_failure(&self) -> Option<PlannedFailure> {
        self.planned.lock().pop_front()
    }
}

impl RemoteTransport for MockTransport {
    fn create(
        &self,
        kind: EntityKind,
        token: OperationId,
        payload: &Value,
    ) -> SyncResult<RemoteId> {
        self.record_call(TransportCall {
            token,
            kind,
            intent: Intent::Create,
            remote_id: None,
            payload: Some(payload.clone()),
        });

        if let Some(failure) = self.take_planned_failure() {
            return Err(failure.into_error());
        }

        // Duplicate token: collapse to the original result.
        if let Some(Some(existing)) = self.seen.lock().get(&token) {
            return Ok(existing.clone());
        }

        let remote_id = RemoteId::new(format!("r-{}", self.next_remote.fetch_add(1, Ordering::SeqCst) + 1));
        self.records
            .lock()
            .insert(remote_id.clone(), (kind, payload.clone()));
        self.seen.lock().insert(token, Some(remote_id.clone()));
        Ok(remote_id)
    }

    fn update(
        &self,
        kind: EntityKind,
        remote_id: &RemoteId,
        token: OperationId,
        payload: &Value,
    ) -> SyncResult<()> {
        self.record_call(TransportCall {
            token,
            kind,
            intent: Intent::Update,
            remote_id: Some(remote_id.clone()),
            payload: Some(payload.clone()),
        });

        if let Some(failure) = self.take_planned_failure() {
            return Err(failure.into_error());
        }

        if self.seen.lock().contains_key(&token) {
            return Ok(());
        }

        let mut records = self.records.lock();
        match records.get_mut(remote_id) {
            Some(record) => record.1 = payload.clone(),
            None => return Err(SyncError::Rejected(format!("no such record {remote_id}"))),
        }
        drop(records);
        self.seen.lock().insert(token, None);
        Ok(())
    }

    fn delete(&self, kind: EntityKind, remote_id: &RemoteId, token: OperationId) -> SyncResult<()> {
        self.record_call(TransportCall {
            token,
            kind,
            intent: Intent::Delete,
            remote_id: Some(remote_id.clone()),
            payload: None,
        });

        if let Some(failure) = self.take_planned_failure() {
            return Err(failure.into_error());
        }

        if self.seen.lock().contains_key(&token) {
            return Ok(());
        }

        self.records.lock().remove(remote_id);
        self.seen.lock().insert(token, None);
        Ok(())
    }
}
