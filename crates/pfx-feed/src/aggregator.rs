//! Periodic consensus pricing.
//!
//! Every cycle drains the tick buffer and, per symbol with both sides
//! present, emits the mean bid and mean ask with a shared confidence of half
//! the bid/ask distance. One-sided symbols publish nothing for the cycle.

use crate::tick_buffer::TickBuffer;
use pfx_core::{Observation, Price, PriceEvent, Side};
use pfx_telemetry::Metrics;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// The side with no observations, if any. Bid is reported first.
pub fn missing_side(observations: &[Observation]) -> Option<Side> {
    let has = |side| observations.iter().any(|o| o.side == side);
    if !has(Side::Bid) {
        Some(Side::Bid)
    } else if !has(Side::Ask) {
        Some(Side::Ask)
    } else {
        None
    }
}

/// Consensus for one symbol: `[bid, ask]`, or `None` when a side is empty.
pub fn aggregate_symbol(symbol: &str, observations: &[Observation]) -> Option<[PriceEvent; 2]> {
    let (bids, asks): (Vec<Price>, Vec<Price>) = observations.iter().fold(
        (Vec::new(), Vec::new()),
        |(mut bids, mut asks), o| {
            match o.side {
                Side::Bid => bids.push(o.price),
                Side::Ask => asks.push(o.price),
            }
            (bids, asks)
        },
    );

    let bid = Price::mean(&bids)?;
    let ask = Price::mean(&asks)?;
    let confidence = (bid - ask).abs() / Decimal::TWO;

    Some([
        PriceEvent {
            symbol: symbol.to_string(),
            side: Side::Bid,
            price: bid,
            confidence,
        },
        PriceEvent {
            symbol: symbol.to_string(),
            side: Side::Ask,
            price: ask,
            confidence,
        },
    ])
}

/// Events for a whole drained snapshot, ordered by symbol.
pub fn aggregate(snapshot: HashMap<String, Vec<Observation>>) -> Vec<PriceEvent> {
    let mut symbols: Vec<_> = snapshot.into_iter().collect();
    symbols.sort_by(|a, b| a.0.cmp(&b.0));

    symbols
        .iter()
        .filter_map(|(symbol, observations)| aggregate_symbol(symbol, observations))
        .flatten()
        .collect()
}

/// Counters from one aggregator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub cycles: u64,
    pub events_sent: u64,
    pub one_sided_skips: u64,
    /// Events dropped because cancellation arrived mid-send.
    pub events_abandoned: u64,
}

/// Timer-driven aggregation task.
///
/// Owns the only sender of the price-event channel, so the channel closes
/// exactly when `run` returns.
pub struct Aggregator {
    buffer: Arc<TickBuffer>,
    tx: mpsc::Sender<PriceEvent>,
    interval: Duration,
}

impl Aggregator {
    pub fn new(buffer: Arc<TickBuffer>, tx: mpsc::Sender<PriceEvent>, interval: Duration) -> Self {
        Self {
            buffer,
            tx,
            interval,
        }
    }

    /// Run cycles until cancelled. No cycle starts after cancellation.
    pub async fn run(self, token: CancellationToken) -> AggregatorStats {
        let mut stats = AggregatorStats::default();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "Aggregator started");

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => break,

                _ = ticker.tick() => {
                    if !self.cycle(&token, &mut stats).await {
                        break;
                    }
                }
            }
        }

        info!(
            cycles = stats.cycles,
            events = stats.events_sent,
            skipped = stats.one_sided_skips,
            abandoned = stats.events_abandoned,
            "Aggregator stopped"
        );
        stats
    }

    /// One drain-aggregate-send pass. Returns false when the loop must stop.
    async fn cycle(&self, token: &CancellationToken, stats: &mut AggregatorStats) -> bool {
        let snapshot = self.buffer.drain_all();
        stats.cycles += 1;
        Metrics::aggregation_cycle();

        if snapshot.is_empty() {
            trace!("Empty cycle");
            return true;
        }

        for (symbol, observations) in &snapshot {
            if let Some(missing) = missing_side(observations) {
                debug!(symbol = %symbol, missing = %missing, "One-sided symbol skipped");
                Metrics::one_sided_skip(missing.as_str());
                stats.one_sided_skips += 1;
            }
        }

        let events = aggregate(snapshot);
        Metrics::price_events(events.len());

        let total = events.len();
        for (sent, event) in events.into_iter().enumerate() {
            trace!(symbol = %event.symbol, side = %event.side, price = %event.price, "Emitting price event");
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    let abandoned = (total - sent) as u64;
                    warn!(abandoned, "Cancelled mid-cycle, abandoning remaining events");
                    stats.events_abandoned += abandoned;
                    return false;
                }

                result = self.tx.send(event) => {
                    if result.is_err() {
                        warn!("Price event receiver dropped, stopping aggregator");
                        return false;
                    }
                    stats.events_sent += 1;
                }
            }
        }
        true
    }
}
