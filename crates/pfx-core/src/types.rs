//! Tick and price data types.
//!
//! An `Observation` is one raw quote from the market-data session. The
//! aggregator folds a cycle's observations into a pair of `PriceEvent`s,
//! which the publisher fans out to every `OracleAccount` of the symbol.

use crate::error::{CoreError, CoreResult};
use crate::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Map a market-data entry type code (0 = bid, 1 = ask).
    pub fn from_code(code: i64) -> CoreResult<Self> {
        match code {
            0 => Ok(Self::Bid),
            1 => Ok(Self::Ask),
            other => Err(CoreError::InvalidSide(other)),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Bid => 0,
            Self::Ask => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single quote received from the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub symbol: String,
    pub side: Side,
    pub price: Price,
    /// Arrival time. Diagnostic only.
    pub received_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(symbol: impl Into<String>, side: Side, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            received_at: Utc::now(),
        }
    }
}

/// Consensus price for one side of a symbol over one aggregation cycle.
///
/// Every cycle produces a bid event followed by an ask event; both carry the
/// same confidence, half the bid/ask spread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub symbol: String,
    pub side: Side,
    pub price: Price,
    pub confidence: Price,
}

/// A pythd price account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OracleAccount {
    /// Base58 account address.
    pub address: String,
    /// Decimal exponent: published integer = price * 10^(-exponent).
    pub exponent: i32,
}

impl OracleAccount {
    pub fn new(address: impl Into<String>, exponent: i32) -> Self {
        Self {
            address: address.into(),
            exponent,
        }
    }
}
