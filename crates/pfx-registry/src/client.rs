//! `get_product_list` client over the oracle WebSocket.

use crate::error::{RegistryError, RegistryResult};
use crate::resolver::{resolve, AccountTable};
use pfx_ws::WsWriteHandle;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

const GET_PRODUCT_LIST: &str = "get_product_list";

/// Fetches the product list through the shared write handle.
pub struct ProductListClient {
    timeout: Duration,
}

impl ProductListClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Raw `get_product_list` result.
    pub async fn fetch(&self, handle: &WsWriteHandle) -> RegistryResult<Value> {
        info!(timeout_ms = self.timeout.as_millis() as u64, "Requesting product list");

        let response = handle
            .call(GET_PRODUCT_LIST, None, self.timeout)
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        response.into_result().map_err(|e| RegistryError::Rpc {
            code: e.code,
            message: e.message,
        })
    }

    /// Fetch and resolve in one step.
    pub async fn fetch_accounts(&self, handle: &WsWriteHandle) -> RegistryResult<AccountTable> {
        let result = self.fetch(handle).await?;
        resolve(&result)
    }
}
