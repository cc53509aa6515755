//! Requests waiting for their `result` frame.
//!
//! Every entry is completed at most once: by its response, by the caller
//! giving up after a timeout, or by [`PendingRequests::fail_all`] when the
//! connection drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

use portbridge_domain::error::{BridgeError, UnavailableError};

pub(crate) type Outcome = Result<Value, BridgeError>;

pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
        }
    }
}

impl PendingRequests {
    /// Allocate the next id and the receiver its response will land in.
    pub(crate) async fn register(&self) -> (u64, oneshot::Receiver<Outcome>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().await.insert(id, tx);
        (id, rx)
    }

    /// Complete request `id`; `false` when nobody waits for it anymore.
    pub(crate) async fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        match self.waiting.lock().await.remove(&id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub(crate) async fn discard(&self, id: u64) {
        self.waiting.lock().await.remove(&id);
    }

    /// Fail every outstanding request with a connection-loss error.
    pub(crate) async fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.waiting.lock().await.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            if tx.send(Err(UnavailableError::ConnectionLost.into())).is_err() {
                tracing::debug!("request caller already gone");
            }
        }
        count
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }
}
