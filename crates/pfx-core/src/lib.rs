//! Core domain types for the FIX-to-Pyth price proxy.
//!
//! This crate provides the types shared by every stage of the pipeline:
//! - `Price`: precision-safe decimal price with oracle fixed-point scaling
//! - `Side`, `Observation`, `PriceEvent`: tick and consensus price values
//! - `OracleAccount`: a pythd price account and its exponent
//! - `Whitelist`: the static set of instruments eligible for publishing

pub mod decimal;
pub mod error;
pub mod types;
pub mod whitelist;

pub use decimal::Price;
pub use error::{CoreError, CoreResult};
pub use types::{Observation, OracleAccount, PriceEvent, Side};
pub use whitelist::Whitelist;
