//! WebSocket write handle for sending JSON-RPC requests.
//!
//! Cloneable and shared across tasks. All writes go through the connection's
//! outbound queue; the message loop owns the socket.

use crate::connection::ConnectionState;
use crate::message::{RpcRequest, RpcResponse};
use crate::pending::PendingRequests;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound message to be sent via WebSocket.
#[derive(Debug)]
pub enum WsOutbound {
    /// Serialized JSON-RPC request.
    Text(String),
}

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Transport not connected (never dialed or closing).
    NotConnected,
    /// Outbound queue closed (message loop gone).
    ChannelClosed,
    /// Queue insertion or response wait exceeded its deadline.
    Timeout,
    /// Request could not be serialized.
    Encode(String),
    /// Transport shut down before the response arrived.
    ResponseDropped,
}

impl SendError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::ChannelClosed => "channel_closed",
            Self::Timeout => "timeout",
            Self::Encode(_) => "encode",
            Self::ResponseDropped => "response_dropped",
        }
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::ChannelClosed => write!(f, "channel closed"),
            Self::Timeout => write!(f, "timed out"),
            Self::Encode(e) => write!(f, "encode failed: {e}"),
            Self::ResponseDropped => write!(f, "response dropped"),
        }
    }
}

impl std::error::Error for SendError {}

/// Write handle for the oracle connection.
///
/// `send_request()` is fire-and-forget: it only confirms the request was
/// queued. `call()` additionally waits for the response with a matching id.
#[derive(Clone)]
pub struct WsWriteHandle {
    tx: mpsc::Sender<WsOutbound>,
    state: Arc<RwLock<ConnectionState>>,
    pending: Arc<PendingRequests>,
    next_id: Arc<AtomicU64>,
}

impl WsWriteHandle {
    pub fn new(
        tx: mpsc::Sender<WsOutbound>,
        state: Arc<RwLock<ConnectionState>>,
        pending: Arc<PendingRequests>,
        next_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tx,
            state,
            pending,
            next_id,
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a request without waiting for its response.
    ///
    /// Waits at most `timeout` for room in the outbound queue. Returns the
    /// request id on success.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<u64, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        let id = self.allocate_id();
        let text = RpcRequest::new(id, method, params)
            .to_json()
            .map_err(|e| SendError::Encode(e.to_string()))?;

        self.enqueue(text, timeout).await?;
        debug!(id, method, "Request queued");
        Ok(id)
    }

    /// Send a request and wait for the matching response.
    ///
    /// `timeout` bounds the whole exchange.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<RpcResponse, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        let id = self.allocate_id();
        let text = RpcRequest::new(id, method, params)
            .to_json()
            .map_err(|e| SendError::Encode(e.to_string()))?;

        let rx = self.pending.register(id);
        let exchange = async {
            self.tx
                .send(WsOutbound::Text(text))
                .await
                .map_err(|_| SendError::ChannelClosed)?;
            debug!(id, method, "Call sent, awaiting response");
            rx.await.map_err(|_| SendError::ResponseDropped)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.pending.cancel(id);
                Err(e)
            }
            Err(_) => {
                self.pending.cancel(id);
                Err(SendError::Timeout)
            }
        }
    }

    async fn enqueue(&self, text: String, timeout: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(WsOutbound::Text(text))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::ChannelClosed),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Connected and the outbound queue is open.
    pub fn is_connected(&self) -> bool {
        let state = *self.state.read();
        state == ConnectionState::Connected && !self.tx.is_closed()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RpcResponse;
    use serde_json::json;

    fn create_test_handle(
        state: ConnectionState,
        capacity: usize,
    ) -> (WsWriteHandle, mpsc::Receiver<WsOutbound>, Arc<PendingRequests>) {
        let (tx, rx) = mpsc::channel(capacity);
        let pending = Arc::new(PendingRequests::new());
        let handle = WsWriteHandle::new(
            tx,
            Arc::new(RwLock::new(state)),
            pending.clone(),
            Arc::new(AtomicU64::new(1)),
        );
        (handle, rx, pending)
    }

    #[tokio::test]
    async fn test_send_request_queues_json() {
        let (handle, mut rx, _) = create_test_handle(ConnectionState::Connected, 100);

        let id = handle
            .send_request(
                "update_price",
                Some(json!({"account": "abc", "price": 1, "conf": 0, "status": "trading"})),
                Duration::from_millis(100),
            )
            .await
            .unwrap();
        assert_eq!(id, 1);

        let WsOutbound::Text(text) = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "update_price");
        assert_eq!(value["id"], 1);
        assert_eq!(value["params"]["account"], "abc");
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let (handle, _rx, _) = create_test_handle(ConnectionState::Connected, 100);
        let a = handle
            .send_request("a", None, Duration::from_millis(100))
            .await
            .unwrap();
        let b = handle
            .send_request("b", None, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_send_not_connected() {
        let (handle, _rx, _) = create_test_handle(ConnectionState::Disconnected, 100);
        let result = handle
            .send_request("update_price", None, Duration::from_millis(100))
            .await;
        assert_eq!(result, Err(SendError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_channel_closed() {
        let (handle, rx, _) = create_test_handle(ConnectionState::Connected, 100);
        drop(rx);
        // A closed queue reads as not connected before any send is attempted.
        assert!(!handle.is_connected());
        let result = handle
            .send_request("update_price", None, Duration::from_millis(100))
            .await;
        assert_eq!(result, Err(SendError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_times_out_when_queue_full() {
        let (handle, _rx, _) = create_test_handle(ConnectionState::Connected, 1);
        handle
            .send_request("first", None, Duration::from_millis(50))
            .await
            .unwrap();

        let result = handle
            .send_request("second", None, Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(SendError::Timeout));
    }

    #[tokio::test]
    async fn test_call_receives_matching_response() {
        let (handle, mut rx, pending) = create_test_handle(ConnectionState::Connected, 100);

        let responder = tokio::spawn(async move {
            let WsOutbound::Text(text) = rx.recv().await.unwrap();
            let value: Value = serde_json::from_str(&text).unwrap();
            let id = value["id"].as_u64().unwrap();
            pending.complete(RpcResponse {
                jsonrpc: "2.0".to_string(),
                id: Some(id),
                result: Some(json!(["ok"])),
                error: None,
            });
        });

        let response = handle
            .call("get_product_list", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!(["ok"])));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_timeout_clears_pending() {
        let (handle, _rx, pending) = create_test_handle(ConnectionState::Connected, 100);

        let result = handle
            .call("get_product_list", None, Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(SendError::Timeout));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_call_response_dropped() {
        let (handle, _rx, pending) = create_test_handle(ConnectionState::Connected, 100);

        let failer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pending.fail_all();
        });

        let result = handle
            .call("get_product_list", None, Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(SendError::ResponseDropped));
        failer.await.unwrap();
    }

    #[test]
    fn test_send_error_reason() {
        assert_eq!(SendError::Timeout.reason(), "timeout");
        assert_eq!(SendError::Encode("x".into()).to_string(), "encode failed: x");
    }
}
