//! Error types for pfx-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid side code: {0}")]
    InvalidSide(i64),

    #[error("Scaled value out of range: {value} at exponent {exponent}")]
    ScaleOverflow { value: String, exponent: i32 },

    #[error("Invalid whitelist: {0}")]
    InvalidWhitelist(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
