//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] pfx_core::CoreError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<pfx_ws::WsError>),

    #[error("Session error: {0}")]
    Feed(#[from] pfx_feed::FeedError),

    #[error("Registry error: {0}")]
    Registry(#[from] pfx_registry::RegistryError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] pfx_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<pfx_ws::WsError> for AppError {
    fn from(e: pfx_ws::WsError) -> Self {
        AppError::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
