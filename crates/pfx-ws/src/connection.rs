//! WebSocket connection manager.
//!
//! Dials the oracle once and runs the message loop until the peer closes,
//! the socket fails, or shutdown is requested. There is no reconnection:
//! the loop returning is the caller's signal that the transport is gone.

use crate::error::{WsError, WsResult};
use crate::message::{RpcMessage, RpcNotification, RpcResponse};
use crate::pending::PendingRequests;
use crate::ws_write_handle::{WsOutbound, WsWriteHandle};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the pythd JSON-RPC endpoint.
    pub url: String,
    /// Dial deadline.
    pub connect_timeout_ms: u64,
    /// How long to wait for the peer's Close after sending ours.
    pub close_timeout_ms: u64,
    /// Outbound queue depth.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8910/".to_string(),
            connect_timeout_ms: 5000,
            close_timeout_ms: 1000,
            outbound_capacity: 1024,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    pending: Arc<PendingRequests>,
    next_id: Arc<AtomicU64>,
    notification_tx: mpsc::Sender<RpcNotification>,
    /// Outbound message sender (for WsWriteHandle).
    outbound_tx: mpsc::Sender<WsOutbound>,
    /// Outbound message receiver (consumed by message loop).
    outbound_rx: Arc<TokioMutex<mpsc::Receiver<WsOutbound>>>,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, notification_tx: mpsc::Sender<RpcNotification>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            pending: Arc::new(PendingRequests::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            notification_tx,
            outbound_tx,
            outbound_rx: Arc::new(TokioMutex::new(outbound_rx)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a write handle for sending requests.
    pub fn write_handle(&self) -> WsWriteHandle {
        WsWriteHandle::new(
            self.outbound_tx.clone(),
            self.state.clone(),
            self.pending.clone(),
            self.next_id.clone(),
        )
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Request a graceful close. The message loop flushes queued requests,
    /// sends a normal-closure Close frame and waits for the peer.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Dial the oracle. Failure or timeout is fatal to the caller.
    pub async fn connect(&self) -> WsResult<WsStream> {
        info!(url = %self.config.url, "Connecting to WebSocket");
        *self.state.write() = ConnectionState::Connecting;

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let dial = connect_async_tls_with_config(&self.config.url, None, true, None);

        let result = match tokio::time::timeout(timeout, dial).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(WsError::ConnectionFailed(e.to_string())),
            Err(_) => Err(WsError::ConnectTimeout(self.config.connect_timeout_ms)),
        };

        match &result {
            Ok(_) => {
                *self.state.write() = ConnectionState::Connected;
                info!("WebSocket connected");
            }
            Err(e) => {
                *self.state.write() = ConnectionState::Disconnected;
                error!(error = %e, "WebSocket dial failed");
            }
        }
        result
    }

    /// Run the message loop on a connected stream.
    ///
    /// Returns `Ok(())` after a requested shutdown or a clean end of stream,
    /// and an error when the peer closes or the socket fails.
    pub async fn run(&self, stream: WsStream) -> WsResult<()> {
        let (mut write, mut read) = stream.split();
        let result = self.message_loop(&mut write, &mut read).await;

        *self.state.write() = ConnectionState::Disconnected;
        let dropped = self.pending.fail_all();
        if dropped > 0 {
            warn!(dropped, "Pending calls abandoned on disconnect");
        }
        result
    }

    async fn message_loop(&self, write: &mut WsSink, read: &mut WsSource) -> WsResult<()> {
        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    self.close(write, read).await;
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = close_frame_parts(frame.as_ref());
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                outbound = outbound_recv => {
                    if let Some(WsOutbound::Text(text)) = outbound {
                        write.send(Message::Text(text)).await?;
                    }
                }
            }
        }
    }

    /// Flush queued requests, send Close(1000), then wait a bounded time for
    /// the peer's Close.
    async fn close(&self, write: &mut WsSink, read: &mut WsSource) {
        *self.state.write() = ConnectionState::Closing;

        let mut flushed = 0usize;
        {
            let mut rx = self.outbound_rx.lock().await;
            while let Ok(WsOutbound::Text(text)) = rx.try_recv() {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(?e, "Failed to flush queued request during shutdown");
                    break;
                }
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!(flushed, "Flushed queued requests before close");
        }

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(e) = write.send(Message::Close(Some(frame))).await {
            warn!(?e, "Failed to send Close frame during shutdown");
            return;
        }

        let deadline = Duration::from_millis(self.config.close_timeout_ms);
        let acknowledged = tokio::time::timeout(deadline, async {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Close(_)) => return true,
                    Ok(Message::Text(text)) => self.handle_text_message(&text),
                    Ok(_) => {}
                    Err(_) => return false,
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        if acknowledged {
            info!("WebSocket close acknowledged by server");
        } else {
            warn!(
                timeout_ms = self.config.close_timeout_ms,
                "No close acknowledgement from server"
            );
        }
    }

    fn handle_text_message(&self, text: &str) {
        debug!(recv = %text, "Received message");

        let msg = match RpcMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Ignoring unparsable message");
                return;
            }
        };

        match msg {
            RpcMessage::Response(response) => {
                route_response(response, &self.pending);
            }
            RpcMessage::Notification(notification) => {
                if let Err(e) = self.notification_tx.try_send(notification) {
                    debug!(error = %e, "Notification not forwarded");
                }
            }
        }
    }
}

/// Deliver a response to its waiter, or log it when nobody is waiting.
///
/// Returns true if a waiter received it.
fn route_response(response: RpcResponse, pending: &PendingRequests) -> bool {
    if let Some(err) = &response.error {
        warn!(id = ?response.id, code = err.code, message = %err.message, "RPC error response");
    }
    let id = response.id;
    if pending.complete(response) {
        return true;
    }
    debug!(id = ?id, "Response without waiter");
    false
}

fn close_frame_parts(frame: Option<&CloseFrame<'_>>) -> (u16, String) {
    frame
        .map(|f| (f.code.into(), f.reason.to_string()))
        .unwrap_or((1005, "No status".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.url, "ws://localhost:8910/");
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.close_timeout_ms, 1000);
    }

    #[test]
    fn test_close_frame_parts() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        };
        assert_eq!(close_frame_parts(Some(&frame)), (1001, "restarting".to_string()));
        assert_eq!(close_frame_parts(None).0, 1005);
    }

    #[tokio::test]
    async fn test_route_response_to_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.register(5);

        let delivered = route_response(
            RpcResponse {
                jsonrpc: "2.0".into(),
                id: Some(5),
                result: Some(json!([])),
                error: None,
            },
            &pending,
        );

        assert!(delivered);
        assert_eq!(rx.await.unwrap().id, Some(5));
    }

    #[test]
    fn test_route_response_without_waiter() {
        let pending = PendingRequests::new();
        let delivered = route_response(
            RpcResponse {
                jsonrpc: "2.0".into(),
                id: Some(42),
                result: Some(json!(0)),
                error: None,
            },
            &pending,
        );
        assert!(!delivered);
    }

    #[test]
    fn test_new_manager_is_disconnected() {
        let (tx, _rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(ConnectionConfig::default(), tx);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.write_handle().is_connected());
        manager.shutdown();
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (tx, _rx) = mpsc::channel(8);
        let config = ConnectionConfig {
            // Port 1 on loopback refuses immediately.
            url: "ws://127.0.0.1:1/".to_string(),
            connect_timeout_ms: 2000,
            ..Default::default()
        };
        let manager = ConnectionManager::new(config, tx);

        let result = manager.connect().await;
        assert!(matches!(
            result,
            Err(WsError::ConnectionFailed(_)) | Err(WsError::ConnectTimeout(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
