//! Pending-response table keyed by request ID.
//!
//! Each outstanding request awaiting a response owns one entry holding the
//! sender half of a oneshot channel. Resolving an entry removes it, so a
//! late or duplicate response finds nothing and is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::envelope::{RequestId, ResponseEnvelope};
use crate::error::{Result, RpcError};

type Waiter = oneshot::Sender<Result<Value>>;

/// Table of requests awaiting a response.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<RequestId, Waiter>>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and get the receiver for its outcome.
    ///
    /// Fails if the ID is already pending.
    pub fn insert(&self, request_id: RequestId) -> Result<oneshot::Receiver<Result<Value>>> {
        let mut pending = self.lock();
        if pending.contains_key(&request_id) {
            return Err(RpcError::DuplicateRequestId(request_id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id, tx);
        Ok(rx)
    }

    /// Resolve the entry matching a response.
    ///
    /// Returns false if no request with that ID is pending.
    pub fn resolve(&self, response: ResponseEnvelope) -> bool {
        let Some(waiter) = self.lock().remove(&response.request_id) else {
            return false;
        };
        // The caller may have stopped waiting; nothing else to do then.
        let _ = waiter.send(response.into_outcome());
        true
    }

    /// Fail a single entry. Returns false if it is no longer pending.
    pub fn fail(&self, request_id: RequestId, error: RpcError) -> bool {
        let Some(waiter) = self.lock().remove(&request_id) else {
            return false;
        };
        let _ = waiter.send(Err(error));
        true
    }

    /// Drop an entry without resolving it.
    pub fn remove(&self, request_id: RequestId) -> bool {
        self.lock().remove(&request_id).is_some()
    }

    /// Fail every pending request, returning how many were failed.
    pub fn fail_all(&self, error: impl Fn() -> RpcError) -> usize {
        let drained: Vec<Waiter> = self.lock().drain().map(|(_, w)| w).collect();
        let count = drained.len();
        for waiter in drained {
            let _ = waiter.send(Err(error()));
        }
        count
    }

    /// Check if a request is pending.
    pub fn contains(&self, request_id: RequestId) -> bool {
        self.lock().contains_key(&request_id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, Waiter>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes a pending entry when the waiting call goes away.
pub(crate) struct PendingGuard {
    pub(crate) table: Arc<CorrelationTable>,
    pub(crate) request_id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RouteResult;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_delivers_outcome() {
        let table = CorrelationTable::new();
        let rx = table.insert(RequestId(1)).unwrap();

        let resolved = table.resolve(ResponseEnvelope::new(
            RequestId(1),
            RouteResult::ok(json!({"pong": true})),
        ));

        assert!(resolved);
        assert!(table.is_empty());
        assert_eq!(rx.await.unwrap().unwrap(), json!({"pong": true}));
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let table = CorrelationTable::new();
        let rx_a = table.insert(RequestId(1)).unwrap();
        let rx_b = table.insert(RequestId(2)).unwrap();

        table.resolve(ResponseEnvelope::new(RequestId(2), RouteResult::ok("b")));
        table.resolve(ResponseEnvelope::new(RequestId(1), RouteResult::ok("a")));

        assert_eq!(rx_a.await.unwrap().unwrap(), json!("a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!("b"));
    }

    #[test]
    fn test_unmatched_and_duplicate_responses_dropped() {
        let table = CorrelationTable::new();
        let _rx = table.insert(RequestId(5)).unwrap();

        assert!(!table.resolve(ResponseEnvelope::new(RequestId(6), RouteResult::ok(1))));
        assert!(table.resolve(ResponseEnvelope::new(RequestId(5), RouteResult::ok(1))));
        assert!(!table.resolve(ResponseEnvelope::new(RequestId(5), RouteResult::ok(1))));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let table = CorrelationTable::new();
        let _rx = table.insert(RequestId(9)).unwrap();

        let err = table.insert(RequestId(9)).unwrap_err();
        assert!(matches!(err, RpcError::DuplicateRequestId(RequestId(9))));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let table = CorrelationTable::new();
        let rx1 = table.insert(RequestId(1)).unwrap();
        let rx2 = table.insert(RequestId(2)).unwrap();

        assert_eq!(table.fail_all(|| RpcError::Disconnected), 2);
        assert!(table.is_empty());
        assert!(matches!(rx1.await.unwrap(), Err(RpcError::Disconnected)));
        assert!(matches!(rx2.await.unwrap(), Err(RpcError::Disconnected)));
    }

    #[tokio::test]
    async fn test_fail_single_entry() {
        let table = CorrelationTable::new();
        let rx = table.insert(RequestId(4)).unwrap();
        let _other = table.insert(RequestId(5)).unwrap();

        assert!(table.fail(RequestId(4), RpcError::Transport("down".to_string())));
        assert!(!table.fail(RequestId(4), RpcError::Disconnected));
        assert!(matches!(rx.await.unwrap(), Err(RpcError::Transport(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_guard_removes_entry() {
        let table = Arc::new(CorrelationTable::new());
        let _rx = table.insert(RequestId(3)).unwrap();
        {
            let _guard = PendingGuard {
                table: Arc::clone(&table),
                request_id: RequestId(3),
            };
            assert!(table.contains(RequestId(3)));
        }
        assert!(!table.contains(RequestId(3)));
    }
}
