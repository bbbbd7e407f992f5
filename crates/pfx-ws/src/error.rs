//! Oracle transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Dial failed: {0}")]
    ConnectionFailed(String),

    #[error("Dial timed out after {0}ms")]
    ConnectTimeout(u64),

    /// The peer sent a Close frame.
    #[error("Closed by oracle (code {code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Invalid JSON-RPC message: {0}")]
    ParseError(String),

    #[error("WebSocket: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON encoding: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;
