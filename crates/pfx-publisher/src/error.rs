//! Publisher error types.

use pfx_core::CoreError;
use pfx_ws::SendError;
use thiserror::Error;

/// Per-account publish failure. Never fatal to the publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Scaling failed: {0}")]
    Scale(#[from] CoreError),

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Encode failed: {0}")]
    Encode(String),
}

impl PublishError {
    /// Short label for the failed-calls metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Scale(_) => "scale_overflow",
            Self::Send(e) => e.reason(),
            Self::Encode(_) => "encode",
        }
    }
}

pub type PublishResult<T> = Result<T, PublishError>;
