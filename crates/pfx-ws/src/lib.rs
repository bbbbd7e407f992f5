//! WebSocket transport for the pythd JSON-RPC API.
//!
//! Provides a single long-lived connection with:
//! - Bounded dial with a connect timeout (no reconnection)
//! - Channel-based outbound queue shared through `WsWriteHandle`
//! - Request/response correlation by JSON-RPC id
//! - Notification forwarding (`notify_price`)
//! - Graceful close: flush queued writes, send Close(1000), await the peer

pub mod connection;
pub mod error;
pub mod message;
pub mod pending;
pub mod ws_write_handle;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, WsStream};
pub use error::{WsError, WsResult};
pub use message::{RpcErrorObject, RpcMessage, RpcNotification, RpcRequest, RpcResponse};
pub use pending::PendingRequests;
pub use ws_write_handle::{SendError, WsOutbound, WsWriteHandle};
