//! Prometheus metrics and structured logging for the price proxy.
//!
//! - Prometheus counters for every pipeline stage (ticks, cycles, events,
//!   oracle calls) plus connection and lifecycle gauges
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{Metrics, MetricsSummary};
