//! Tick parsing.
//!
//! The session hands over market-data entries as raw strings and codes
//! (symbol, entry type 0/1, price text). Parsing turns them into typed
//! observations; anything malformed is rejected here and never buffered.
//!
//! Replay input uses one JSON object per line:
//!
//! ```text
//! {"type":"tick","symbol":"XAUUSD","side":0,"price":"1900.10"}
//! {"type":"security_list","symbols":["XAUUSD","XAGUSD"]}
//! {"type":"wait","ms":500}
//! {"type":"logout"}
//! ```

use crate::error::{FeedError, FeedResult};
use crate::session::SessionEvent;
use pfx_core::{Observation, Price, Side};
use serde::{Deserialize, Serialize};

/// Raw market-data entry as delivered by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTick {
    pub symbol: String,
    /// Entry type code: 0 = bid, 1 = ask.
    pub side: i64,
    /// Decimal price text.
    pub price: String,
}

impl RawTick {
    pub fn new(symbol: impl Into<String>, side: i64, price: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price: price.into(),
        }
    }
}

/// Validate a raw tick into an observation stamped with the current time.
pub fn parse_tick(raw: &RawTick) -> FeedResult<Observation> {
    let symbol = raw.symbol.trim();
    if symbol.is_empty() {
        return Err(FeedError::EmptySymbol);
    }

    let side = Side::from_code(raw.side).map_err(|_| FeedError::BadSide {
        symbol: symbol.to_string(),
        code: raw.side,
    })?;

    let price: Price = raw.price.parse().map_err(|source| FeedError::BadPrice {
        symbol: symbol.to_string(),
        source,
    })?;

    Ok(Observation::new(symbol, side, price))
}

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayLine {
    Tick(RawTick),
    SecurityList { symbols: Vec<String> },
    /// Pause the replay.
    Wait { ms: u64 },
    Logon,
    Logout,
}

impl ReplayLine {
    pub fn parse(line: &str) -> FeedResult<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Session event carried by this line; `Wait` carries none.
    pub fn into_event(self) -> Option<SessionEvent> {
        match self {
            Self::Tick(tick) => Some(SessionEvent::Tick(tick)),
            Self::SecurityList { symbols } => Some(SessionEvent::SecurityList(symbols)),
            Self::Logon => Some(SessionEvent::Logon),
            Self::Logout => Some(SessionEvent::Logout),
            Self::Wait { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_bid_and_ask() {
        let bid = parse_tick(&RawTick::new("XAUUSD", 0, "1900.10")).unwrap();
        assert_eq!(bid.side, Side::Bid);
        assert_eq!(bid.price, Price::new(dec!(1900.10)));

        let ask = parse_tick(&RawTick::new("XAUUSD", 1, "1900.30")).unwrap();
        assert_eq!(ask.side, Side::Ask);
    }

    #[test]
    fn test_reject_bad_side() {
        let err = parse_tick(&RawTick::new("XAUUSD", 2, "1900.10")).unwrap_err();
        assert!(matches!(err, FeedError::BadSide { code: 2, .. }));
        assert_eq!(err.reason(), "bad_side");
    }

    #[test]
    fn test_reject_bad_price() {
        let err = parse_tick(&RawTick::new("XAUUSD", 0, "19oo.10")).unwrap_err();
        assert!(matches!(err, FeedError::BadPrice { .. }));
        assert_eq!(err.reason(), "bad_price");
    }

    #[test]
    fn test_reject_empty_symbol() {
        let err = parse_tick(&RawTick::new("  ", 0, "1.0")).unwrap_err();
        assert!(matches!(err, FeedError::EmptySymbol));
    }

    #[test]
    fn test_replay_lines() {
        let tick = ReplayLine::parse(r#"{"type":"tick","symbol":"XAUUSD","side":1,"price":"1902.0"}"#)
            .unwrap();
        assert_eq!(
            tick.into_event(),
            Some(SessionEvent::Tick(RawTick::new("XAUUSD", 1, "1902.0")))
        );

        let list = ReplayLine::parse(r#"{"type":"security_list","symbols":["XAUUSD"]}"#).unwrap();
        assert_eq!(
            list.into_event(),
            Some(SessionEvent::SecurityList(vec!["XAUUSD".to_string()]))
        );

        let wait = ReplayLine::parse(r#"{"type":"wait","ms":250}"#).unwrap();
        assert_eq!(wait, ReplayLine::Wait { ms: 250 });
        assert_eq!(wait.into_event(), None);

        assert!(ReplayLine::parse(r#"{"type":"quote"}"#).is_err());
    }
}
