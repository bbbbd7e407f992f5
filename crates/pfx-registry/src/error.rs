//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Product list resolution failed: {0}")]
    Resolution(String),

    #[error("Oracle returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Product list request failed: {0}")]
    Transport(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
