//! Market-data session boundary.
//!
//! A `SessionEngine` produces `SessionEvent`s on a channel; the
//! `SessionConsumer` turns ticks into buffered observations and answers the
//! venue's security list with a subscription request for whitelisted
//! symbols.
//!
//! Engines shipped here:
//! - `ReplaySession`: JSON lines from a file or stdin (see `parser`)
//! - `ChannelSession`: events pushed in-process through an mpsc sender

use crate::error::{FeedError, FeedResult};
use crate::parser::{parse_tick, RawTick, ReplayLine};
use crate::tick_buffer::TickBuffer;
use pfx_core::Whitelist;
use pfx_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Event delivered by a session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Tick(RawTick),
    /// Symbols the venue can quote.
    SecurityList(Vec<String>),
    Logon,
    Logout,
    /// The session is over; no more events follow.
    Terminated,
}

/// A market-data session.
pub trait SessionEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Begin delivering events on `tx`. Failure to start is fatal.
    fn start(&self, tx: mpsc::Sender<SessionEvent>) -> BoxFuture<'_, FeedResult<()>>;

    /// Request market data for `symbols`.
    fn subscribe<'a>(&'a self, symbols: &'a [String]) -> BoxFuture<'a, FeedResult<()>>;

    /// Stop delivering events and release the session.
    fn stop(&self) -> BoxFuture<'_, ()>;
}

pub type DynSessionEngine = Arc<dyn SessionEngine>;

// ============================================================================
// Subscription planning
// ============================================================================

/// Which whitelisted symbols to request from the venue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// Enabled and quoted by the venue, sorted.
    pub requested: Vec<String>,
    /// Enabled but not quoted by the venue, sorted.
    pub unsupported: Vec<String>,
}

pub fn plan_subscriptions(whitelist: &Whitelist, venue_symbols: &[String]) -> SubscriptionPlan {
    let venue: HashSet<&str> = venue_symbols.iter().map(String::as_str).collect();
    let (requested, unsupported) = whitelist
        .enabled_symbols()
        .into_iter()
        .partition(|symbol| venue.contains(symbol.as_str()));
    SubscriptionPlan {
        requested,
        unsupported,
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Why the consumer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    Cancelled,
    /// The engine sent `Terminated`.
    Terminated,
    /// Every event sender was dropped.
    InputClosed,
}

/// Feeds session events into the tick buffer.
pub struct SessionConsumer {
    buffer: Arc<TickBuffer>,
    whitelist: Arc<Whitelist>,
    engine: DynSessionEngine,
}

impl SessionConsumer {
    pub fn new(buffer: Arc<TickBuffer>, whitelist: Arc<Whitelist>, engine: DynSessionEngine) -> Self {
        Self {
            buffer,
            whitelist,
            engine,
        }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<SessionEvent>,
        token: CancellationToken,
    ) -> ConsumerExit {
        loop {
            let event = tokio::select! {
                biased;

                () = token.cancelled() => return ConsumerExit::Cancelled,

                event = rx.recv() => event,
            };

            let Some(event) = event else {
                warn!(session = self.engine.name(), "Session event channel closed");
                return ConsumerExit::InputClosed;
            };

            // A slow subscribe must not outlive cancellation.
            let exit = tokio::select! {
                biased;

                () = token.cancelled() => return ConsumerExit::Cancelled,

                exit = self.handle_event(event) => exit,
            };
            if let Some(exit) = exit {
                return exit;
            }
        }
    }

    async fn handle_event(&self, event: SessionEvent) -> Option<ConsumerExit> {
        match event {
            SessionEvent::Tick(raw) => {
                self.handle_tick(&raw);
                None
            }
            SessionEvent::SecurityList(symbols) => {
                self.handle_security_list(&symbols).await;
                None
            }
            SessionEvent::Logon => {
                info!(session = self.engine.name(), "Session logged on");
                None
            }
            SessionEvent::Logout => {
                warn!(session = self.engine.name(), "Session logged out");
                None
            }
            SessionEvent::Terminated => {
                info!(session = self.engine.name(), "Session terminated");
                Some(ConsumerExit::Terminated)
            }
        }
    }

    fn handle_tick(&self, raw: &RawTick) {
        let observation = match parse_tick(raw) {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "Tick rejected");
                Metrics::tick_rejected(e.reason());
                return;
            }
        };

        let side = observation.side;
        if self.buffer.record(observation) {
            Metrics::tick_recorded(side.as_str());
        } else {
            debug!(symbol = %raw.symbol, "Tick after buffer close ignored");
            Metrics::tick_rejected("buffer_closed");
        }
    }

    async fn handle_security_list(&self, symbols: &[String]) {
        let plan = plan_subscriptions(&self.whitelist, symbols);
        for symbol in &plan.unsupported {
            warn!(symbol = %symbol, "Whitelisted symbol not supported by venue");
        }
        if plan.requested.is_empty() {
            warn!(venue_symbols = symbols.len(), "No whitelisted symbol to subscribe");
            return;
        }

        info!(count = plan.requested.len(), symbols = ?plan.requested, "Requesting market data");
        if let Err(e) = self.engine.subscribe(&plan.requested).await {
            warn!(error = %e, "Market data request failed");
        }
    }
}

// ============================================================================
// Replay session
// ============================================================================

#[derive(Debug, Clone)]
enum ReplaySource {
    File(PathBuf),
    Stdin,
}

/// Replays recorded session events from JSON lines.
///
/// Sends `Logon` first and `Terminated` at end of input. A line that fails
/// to parse is skipped.
pub struct ReplaySession {
    source: ReplaySource,
    interval: Duration,
    credential: Option<String>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    requested: Mutex<Vec<String>>,
}

impl ReplaySession {
    pub fn from_file(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self::with_source(ReplaySource::File(path.into()), interval)
    }

    pub fn stdin(interval: Duration) -> Self {
        Self::with_source(ReplaySource::Stdin, interval)
    }

    fn with_source(source: ReplaySource, interval: Duration) -> Self {
        Self {
            source,
            interval,
            credential: None,
            token: CancellationToken::new(),
            task: Mutex::new(None),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Shared session credential. Never logged.
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.is_empty());
        self
    }

    /// Symbols requested through `subscribe`.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    async fn open(&self) -> FeedResult<Box<dyn AsyncBufRead + Send + Unpin>> {
        match &self.source {
            ReplaySource::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    FeedError::Session(format!("cannot open replay {}: {e}", path.display()))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
            ReplaySource::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
        }
    }
}

impl SessionEngine for ReplaySession {
    fn name(&self) -> &str {
        match self.source {
            ReplaySource::File(_) => "replay",
            ReplaySource::Stdin => "stdin",
        }
    }

    fn start(&self, tx: mpsc::Sender<SessionEvent>) -> BoxFuture<'_, FeedResult<()>> {
        Box::pin(async move {
            let reader = self.open().await?;
            info!(
                session = self.name(),
                source = ?self.source,
                authenticated = self.credential.is_some(),
                "Replay session starting"
            );

            let handle = tokio::spawn(replay_lines(
                reader,
                tx,
                self.interval,
                self.token.clone(),
            ));
            *self.task.lock() = Some(handle);
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, symbols: &'a [String]) -> BoxFuture<'a, FeedResult<()>> {
        Box::pin(async move {
            debug!(?symbols, "Replay subscription recorded");
            self.requested.lock().extend(symbols.iter().cloned());
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.token.cancel();
            let handle = self.task.lock().take();
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Replay task ended abnormally");
                }
            }
            info!(session = self.name(), "Replay session stopped");
        })
    }
}

async fn replay_lines(
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    tx: mpsc::Sender<SessionEvent>,
    interval: Duration,
    token: CancellationToken,
) {
    if tx.send(SessionEvent::Logon).await.is_err() {
        return;
    }

    let mut lines = reader.lines();
    let mut line_no = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return,
            next = lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Replay read failed");
                break;
            }
        };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let parsed = match ReplayLine::parse(trimmed) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed replay line");
                Metrics::tick_rejected("malformed_line");
                continue;
            }
        };

        let pause = match &parsed {
            ReplayLine::Wait { ms } => Duration::from_millis(*ms),
            _ => interval,
        };

        if let Some(event) = parsed.into_event() {
            if tx.send(event).await.is_err() {
                return;
            }
        }

        if !pause.is_zero() {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    info!(lines = line_no, "Replay input exhausted");
    let _ = tx.send(SessionEvent::Terminated).await;
}

// ============================================================================
// Channel session
// ============================================================================

/// Session fed in-process through the sender returned by `new`.
///
/// Dropping every input sender ends the session with `Terminated`.
pub struct ChannelSession {
    input: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<String>>,
}

impl ChannelSession {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<SessionEvent>) {
        let (input_tx, input_rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            input: Mutex::new(Some(input_rx)),
            token: CancellationToken::new(),
            task: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        };
        (session, input_tx)
    }

    /// Symbols requested through `subscribe`.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }
}

impl SessionEngine for ChannelSession {
    fn name(&self) -> &str {
        "channel"
    }

    fn start(&self, tx: mpsc::Sender<SessionEvent>) -> BoxFuture<'_, FeedResult<()>> {
        Box::pin(async move {
            let mut input = self
                .input
                .lock()
                .take()
                .ok_or_else(|| FeedError::Session("channel session already started".into()))?;
            let token = self.token.clone();

            let handle = tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        biased;
                        () = token.cancelled() => return,
                        event = input.recv() => event,
                    };
                    let event = event.unwrap_or(SessionEvent::Terminated);
                    let last = event == SessionEvent::Terminated;
                    if tx.send(event).await.is_err() || last {
                        return;
                    }
                }
            });
            *self.task.lock() = Some(handle);
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, symbols: &'a [String]) -> BoxFuture<'a, FeedResult<()>> {
        Box::pin(async move {
            self.subscriptions.lock().extend(symbols.iter().cloned());
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.token.cancel();
            let handle = self.task.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        })
    }
}
