//! FIX-to-Pyth price proxy.
//!
//! Wires a market-data session to the pythd oracle:
//! - session events into a tick buffer
//! - periodic bid/ask aggregation into price events
//! - per-account `update_price` calls over JSON-RPC/WebSocket

pub mod app;
pub mod config;
pub mod error;
pub mod lifecycle;

pub use app::{Application, RunReport};
pub use config::{AppConfig, SessionKind};
pub use error::{AppError, AppResult};
pub use lifecycle::{LifecycleState, ShutdownHandle, ShutdownTrigger};
