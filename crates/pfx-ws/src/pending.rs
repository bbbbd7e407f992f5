//! In-flight request table for JSON-RPC id correlation.

use crate::message::RpcResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Requests awaiting a response, keyed by JSON-RPC id.
///
/// Only `call`-style requests register here. Fire-and-forget requests
/// (`update_price`) get ids too, but their responses are just logged.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u64) -> oneshot::Receiver<RpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id, tx);
        rx
    }

    /// Hand a response to its waiter. Returns false if nobody was waiting.
    pub fn complete(&self, response: RpcResponse) -> bool {
        let Some(id) = response.id else {
            return false;
        };
        let waiter = self.inner.lock().remove(&id);
        match waiter {
            // Receiver may have timed out already.
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, id: u64) {
        self.inner.lock().remove(&id);
    }

    /// Drop every waiter; their receivers resolve with an error.
    pub fn fail_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.len();
        inner.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
