//! Price publishing to the pythd oracle.
//!
//! The `Publisher` consumes consensus `PriceEvent`s, filters them through the
//! whitelist and the account table, scales each price to the account's
//! exponent and sends `update_price` through a `PriceSender`.
//!
//! # Key Components
//!
//! - [`Publisher`]: channel-draining publish loop
//! - [`PriceSender`]: transport seam; [`RpcPriceSender`] for the oracle
//!   connection, [`MockPriceSender`] for tests
//! - [`subscribe_accounts`]: optional `subscribe_price` for every account

pub mod error;
pub mod publisher;
pub mod sender;

pub use error::{PublishError, PublishResult};
pub use publisher::{subscribe_accounts, Publisher, PublisherStats};
pub use sender::{
    BoxFuture, DynPriceSender, MockOutcome, MockPriceSender, PriceSender, RpcPriceSender,
    UpdatePriceParams, STATUS_TRADING,
};
