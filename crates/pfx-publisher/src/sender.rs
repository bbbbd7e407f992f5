//! Price sender trait and implementations.
//!
//! The trait separates publish decisions from transport so the publisher
//! can be driven by a mock in tests.

use crate::error::{PublishError, PublishResult};
use pfx_ws::WsWriteHandle;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Publish status sent with every update.
pub const STATUS_TRADING: &str = "trading";

const UPDATE_PRICE: &str = "update_price";
const SUBSCRIBE_PRICE: &str = "subscribe_price";

/// `update_price` parameters, already scaled to the account exponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatePriceParams {
    pub account: String,
    pub price: i64,
    pub conf: i64,
    pub status: String,
}

impl UpdatePriceParams {
    pub fn trading(account: impl Into<String>, price: i64, conf: i64) -> Self {
        Self {
            account: account.into(),
            price,
            conf,
            status: STATUS_TRADING.to_string(),
        }
    }
}

/// Transport for oracle price calls.
pub trait PriceSender: Send + Sync {
    /// Queue one `update_price` (fire-and-forget).
    fn update_price(&self, params: UpdatePriceParams) -> BoxFuture<'_, PublishResult<()>>;

    /// Queue one `subscribe_price` for an account.
    fn subscribe_price<'a>(&'a self, account: &'a str) -> BoxFuture<'a, PublishResult<()>>;
}

pub type DynPriceSender = Arc<dyn PriceSender>;

/// Production sender over the oracle write handle.
///
/// Each call waits at most `send_timeout` for room in the outbound queue.
/// Responses are not awaited; the connection logs error responses.
pub struct RpcPriceSender {
    handle: WsWriteHandle,
    send_timeout: Duration,
}

impl RpcPriceSender {
    pub fn new(handle: WsWriteHandle, send_timeout: Duration) -> Self {
        Self {
            handle,
            send_timeout,
        }
    }
}

impl PriceSender for RpcPriceSender {
    fn update_price(&self, params: UpdatePriceParams) -> BoxFuture<'_, PublishResult<()>> {
        Box::pin(async move {
            let value =
                serde_json::to_value(&params).map_err(|e| PublishError::Encode(e.to_string()))?;
            let id = self
                .handle
                .send_request(UPDATE_PRICE, Some(value), self.send_timeout)
                .await?;
            debug!(id, account = %params.account, price = params.price, conf = params.conf, "update_price queued");
            Ok(())
        })
    }

    fn subscribe_price<'a>(&'a self, account: &'a str) -> BoxFuture<'a, PublishResult<()>> {
        Box::pin(async move {
            let params = serde_json::json!({ "account": account });
            let id = self
                .handle
                .send_request(SUBSCRIBE_PRICE, Some(params), self.send_timeout)
                .await?;
            debug!(id, account = %account, "subscribe_price queued");
            Ok(())
        })
    }
}

/// Outcome the mock returns for the next calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Sent,
    Fail(pfx_ws::SendError),
}

/// Mock sender for testing.
#[derive(Debug)]
pub struct MockPriceSender {
    updates: parking_lot::Mutex<Vec<UpdatePriceParams>>,
    subscriptions: parking_lot::Mutex<Vec<String>>,
    next_outcome: parking_lot::Mutex<MockOutcome>,
    delay: parking_lot::Mutex<Duration>,
}

impl Default for MockPriceSender {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPriceSender {
    pub fn new() -> Self {
        Self {
            updates: parking_lot::Mutex::new(Vec::new()),
            subscriptions: parking_lot::Mutex::new(Vec::new()),
            next_outcome: parking_lot::Mutex::new(MockOutcome::Sent),
            delay: parking_lot::Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_next_outcome(&self, outcome: MockOutcome) {
        *self.next_outcome.lock() = outcome;
    }

    /// Make every call take `delay` before completing.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Updates that completed (successfully or not), in call order.
    pub fn updates(&self) -> Vec<UpdatePriceParams> {
        self.updates.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    fn outcome(&self) -> PublishResult<()> {
        match self.next_outcome.lock().clone() {
            MockOutcome::Sent => Ok(()),
            MockOutcome::Fail(e) => Err(PublishError::Send(e)),
        }
    }
}

impl PriceSender for MockPriceSender {
    fn update_price(&self, params: UpdatePriceParams) -> BoxFuture<'_, PublishResult<()>> {
        Box::pin(async move {
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.updates.lock().push(params);
            self.outcome()
        })
    }

    fn subscribe_price<'a>(&'a self, account: &'a str) -> BoxFuture<'a, PublishResult<()>> {
        Box::pin(async move {
            self.subscriptions.lock().push(account.to_string());
            self.outcome()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use pfx_ws::{ConnectionState, PendingRequests, SendError, WsOutbound};
    use serde_json::Value;
    use std::sync::atomic::AtomicU64;
    use tokio::sync::mpsc;

    fn create_test_sender(
        state: ConnectionState,
    ) -> (RpcPriceSender, mpsc::Receiver<WsOutbound>) {
        let (tx, rx) = mpsc::channel(100);
        let handle = WsWriteHandle::new(
            tx,
            Arc::new(RwLock::new(state)),
            Arc::new(PendingRequests::new()),
            Arc::new(AtomicU64::new(1)),
        );
        (RpcPriceSender::new(handle, Duration::from_millis(100)), rx)
    }

    #[tokio::test]
    async fn test_update_price_wire_format() {
        let (sender, mut rx) = create_test_sender(ConnectionState::Connected);

        sender
            .update_price(UpdatePriceParams::trading("px1", 190_010_000, 10_000))
            .await
            .unwrap();

        let WsOutbound::Text(text) = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "update_price");
        assert_eq!(
            value["params"],
            serde_json::json!({"account": "px1", "price": 190_010_000i64, "conf": 10_000, "status": "trading"})
        );
    }

    #[tokio::test]
    async fn test_subscribe_price_wire_format() {
        let (sender, mut rx) = create_test_sender(ConnectionState::Connected);
        sender.subscribe_price("px1").await.unwrap();

        let WsOutbound::Text(text) = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "subscribe_price");
        assert_eq!(value["params"]["account"], "px1");
    }

    #[tokio::test]
    async fn test_update_price_disconnected() {
        let (sender, _rx) = create_test_sender(ConnectionState::Disconnected);
        let err = sender
            .update_price(UpdatePriceParams::trading("px1", 1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Send(SendError::NotConnected)));
        assert_eq!(err.reason(), "not_connected");
    }

    #[tokio::test]
    async fn test_mock_records_and_fails_on_demand() {
        let mock = MockPriceSender::new();
        mock.update_price(UpdatePriceParams::trading("a", 1, 0))
            .await
            .unwrap();

        mock.set_next_outcome(MockOutcome::Fail(SendError::Timeout));
        let err = mock
            .update_price(UpdatePriceParams::trading("b", 2, 0))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "timeout");
        assert_eq!(mock.updates().len(), 2);
    }
}
