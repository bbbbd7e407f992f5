//! Oracle account registry.
//!
//! Fetches the pythd product list once at startup and resolves each
//! instrument's generic symbol to the price accounts that publish it.

pub mod client;
pub mod error;
pub mod resolver;

pub use client::ProductListClient;
pub use error::{RegistryError, RegistryResult};
pub use resolver::{resolve, AccountTable, RawPriceAccount, RawProduct};
