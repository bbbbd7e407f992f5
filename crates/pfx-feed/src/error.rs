//! Feed error types.

use pfx_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Tick has no symbol")]
    EmptySymbol,

    #[error("Invalid tick price for {symbol}: {source}")]
    BadPrice {
        symbol: String,
        #[source]
        source: CoreError,
    },

    #[error("Invalid tick side code for {symbol}: {code}")]
    BadSide { symbol: String, code: i64 },

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Short label for the rejected-ticks metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptySymbol => "empty_symbol",
            Self::BadPrice { .. } => "bad_price",
            Self::BadSide { .. } => "bad_side",
            Self::Session(_) => "session",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
