//! Tick intake and periodic aggregation.
//!
//! Session events flow through the `SessionConsumer` into the `TickBuffer`;
//! the `Aggregator` drains it on a fixed interval and emits bid/ask
//! consensus `PriceEvent`s on a bounded channel.

pub mod aggregator;
pub mod error;
pub mod parser;
pub mod session;
pub mod tick_buffer;

pub use aggregator::{aggregate, aggregate_symbol, missing_side, Aggregator, AggregatorStats};
pub use error::{FeedError, FeedResult};
pub use parser::{parse_tick, RawTick, ReplayLine};
pub use session::{
    plan_subscriptions, ChannelSession, ConsumerExit, DynSessionEngine, ReplaySession,
    SessionConsumer, SessionEngine, SessionEvent, SubscriptionPlan,
};
pub use tick_buffer::TickBuffer;
