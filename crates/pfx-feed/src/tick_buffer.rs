//! Per-symbol tick buffer shared by the session consumer and the aggregator.

use pfx_core::{Observation, Price, Side};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Inner {
    ticks: HashMap<String, Vec<Observation>>,
    closed: bool,
}

/// Observations received since the last drain, grouped by symbol.
///
/// One mutex guards the map and the closed flag, so a drain swaps out every
/// sequence at once and a record can never land after `close()`.
#[derive(Debug, Default)]
pub struct TickBuffer {
    inner: Mutex<Inner>,
}

impl TickBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation. Returns false once the buffer is closed.
    pub fn record(&self, observation: Observation) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner
            .ticks
            .entry(observation.symbol.clone())
            .or_default()
            .push(observation);
        true
    }

    pub fn record_tick(&self, symbol: &str, side: Side, price: Price) -> bool {
        self.record(Observation::new(symbol, side, price))
    }

    /// Take every buffered sequence, leaving the buffer empty.
    pub fn drain_all(&self) -> HashMap<String, Vec<Observation>> {
        std::mem::take(&mut self.inner.lock().ticks)
    }

    /// Symbols with buffered observations, sorted.
    pub fn pending_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.inner.lock().ticks.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Total buffered observations.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().ticks.values().map(Vec::len).sum()
    }

    /// Reject all further records.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
