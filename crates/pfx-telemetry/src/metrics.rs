//! Prometheus metrics for the price proxy.
//!
//! Covers each pipeline stage:
//! - Session ticks recorded / rejected
//! - Aggregation cycles and one-sided skips
//! - Price events emitted and dropped before publishing
//! - `update_price` calls sent and failed, send latency
//! - Oracle connection and lifecycle state
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, TextEncoder,
};
use serde::Serialize;

/// Oracle WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "pfx_ws_connected",
        "Oracle WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Lifecycle state (one-hot).
/// Labels: state (starting/running/draining/stopped)
pub static LIFECYCLE_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pfx_lifecycle_state",
        "Lifecycle coordinator state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Ticks accepted into the tick buffer.
pub static TICKS_RECORDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pfx_ticks_recorded_total",
        "Ticks recorded into the tick buffer",
        &["side"]
    )
    .unwrap()
});

/// Ticks rejected before reaching the buffer.
pub static TICKS_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pfx_ticks_rejected_total",
        "Ticks rejected (bad price, bad side, buffer closed)",
        &["reason"]
    )
    .unwrap()
});

pub static AGGREGATION_CYCLES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "pfx_aggregation_cycles_total",
        "Aggregation cycles executed"
    )
    .unwrap()
});

/// Symbols skipped for a cycle because one side had no observations.
pub static ONE_SIDED_SKIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pfx_one_sided_skips_total",
        "Symbols skipped in a cycle for lack of one side",
        &["missing"]
    )
    .unwrap()
});

pub static PRICE_EVENTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("pfx_price_events_total", "Consensus price events emitted").unwrap()
});

/// Price events filtered out by the publisher.
pub static EVENTS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pfx_events_dropped_total",
        "Price events dropped before publishing",
        &["reason"]
    )
    .unwrap()
});

pub static UPDATE_PRICE_SENT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "pfx_update_price_sent_total",
        "update_price requests queued for the oracle"
    )
    .unwrap()
});

pub static UPDATE_PRICE_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pfx_update_price_failed_total",
        "update_price requests that could not be sent",
        &["reason"]
    )
    .unwrap()
});

/// Time to queue one `update_price`, in milliseconds.
pub static UPDATE_PRICE_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "pfx_update_price_latency_ms",
        "Time to queue an update_price request in milliseconds",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 2000.0]
    )
    .unwrap()
});

const LIFECYCLE_STATES: [&str; 4] = ["starting", "running", "draining", "stopped"];

/// Point-in-time totals for the periodic summary log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub ticks_recorded: f64,
    pub ticks_rejected: f64,
    pub cycles: f64,
    pub price_events: f64,
    pub events_dropped: f64,
    pub updates_sent: f64,
    pub updates_failed: f64,
}

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the lifecycle state. Only the active state is 1.
    pub fn lifecycle_state_set(state: &str) {
        for s in &LIFECYCLE_STATES {
            LIFECYCLE_STATE.with_label_values(&[s]).set(0.0);
        }
        LIFECYCLE_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn tick_recorded(side: &str) {
        TICKS_RECORDED_TOTAL.with_label_values(&[side]).inc();
    }

    pub fn tick_rejected(reason: &str) {
        TICKS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn aggregation_cycle() {
        AGGREGATION_CYCLES_TOTAL.inc();
    }

    /// `missing` is the empty side ("bid" or "ask").
    pub fn one_sided_skip(missing: &str) {
        ONE_SIDED_SKIPS_TOTAL.with_label_values(&[missing]).inc();
    }

    pub fn price_events(count: usize) {
        PRICE_EVENTS_TOTAL.inc_by(count as f64);
    }

    pub fn event_dropped(reason: &str) {
        EVENTS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn update_price_sent(latency_ms: f64) {
        UPDATE_PRICE_SENT_TOTAL.inc();
        UPDATE_PRICE_LATENCY_MS.observe(latency_ms);
    }

    pub fn update_price_failed(reason: &str) {
        UPDATE_PRICE_FAILED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }

    pub fn summary() -> MetricsSummary {
        MetricsSummary {
            ticks_recorded: counter_vec_total(&TICKS_RECORDED_TOTAL),
            ticks_rejected: counter_vec_total(&TICKS_REJECTED_TOTAL),
            cycles: AGGREGATION_CYCLES_TOTAL.get(),
            price_events: PRICE_EVENTS_TOTAL.get(),
            events_dropped: counter_vec_total(&EVENTS_DROPPED_TOTAL),
            updates_sent: UPDATE_PRICE_SENT_TOTAL.get(),
            updates_failed: counter_vec_total(&UPDATE_PRICE_FAILED_TOTAL),
        }
    }
}

/// Sum a counter across all of its label values.
fn counter_vec_total(vec: &CounterVec) -> f64 {
    use prometheus::core::Collector;

    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|m| m.get_counter().get_value())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_in_summary() {
        let before = Metrics::summary();

        Metrics::tick_recorded("bid");
        Metrics::tick_recorded("ask");
        Metrics::tick_rejected("bad_side");
        Metrics::aggregation_cycle();
        Metrics::price_events(2);
        Metrics::event_dropped("not_whitelisted");
        Metrics::update_price_sent(0.3);
        Metrics::update_price_failed("timeout");

        let after = Metrics::summary();
        assert!(after.ticks_recorded >= before.ticks_recorded + 2.0);
        assert!(after.ticks_rejected >= before.ticks_rejected + 1.0);
        assert!(after.cycles >= before.cycles + 1.0);
        assert!(after.price_events >= before.price_events + 2.0);
        assert!(after.events_dropped >= before.events_dropped + 1.0);
        assert!(after.updates_sent >= before.updates_sent + 1.0);
        assert!(after.updates_failed >= before.updates_failed + 1.0);
    }

    #[test]
    fn test_lifecycle_state_is_one_hot() {
        Metrics::lifecycle_state_set("draining");
        assert_eq!(LIFECYCLE_STATE.with_label_values(&["draining"]).get(), 1.0);
        assert_eq!(LIFECYCLE_STATE.with_label_values(&["running"]).get(), 0.0);
    }

    #[test]
    fn test_render_contains_metric_names() {
        Metrics::ws_connected();
        Metrics::one_sided_skip("ask");
        let text = Metrics::render().unwrap();
        assert!(text.contains("pfx_ws_connected"));
        assert!(text.contains("pfx_one_sided_skips_total"));
    }
}
