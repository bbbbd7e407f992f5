//! Proxy orchestration.
//!
//! Startup wires the pipeline end to end:
//! session -> tick buffer -> aggregator -> publisher -> oracle.
//! The first shutdown trigger (interrupt, session end, transport loss)
//! starts a drain that stops the stages in that same order.

use crate::config::{AppConfig, SessionKind};
use crate::error::{AppError, AppResult};
use crate::lifecycle::{
    interrupt_signal, Lifecycle, LifecycleState, ShutdownHandle, ShutdownTrigger,
};
use parking_lot::Mutex;
use pfx_core::{PriceEvent, Whitelist};
use pfx_feed::{
    Aggregator, AggregatorStats, ConsumerExit, DynSessionEngine, ReplaySession, SessionConsumer,
    TickBuffer,
};
use pfx_publisher::{subscribe_accounts, DynPriceSender, Publisher, PublisherStats, RpcPriceSender};
use pfx_registry::{AccountTable, ProductListClient};
use pfx_telemetry::Metrics;
use pfx_ws::{ConnectionConfig, ConnectionManager, RpcNotification, WsResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TRIGGER_CAPACITY: usize = 4;
const NOTIFICATION_CAPACITY: usize = 256;
/// Extra time the reader gets beyond the close timeout to flush and exit.
const CLOSE_MARGIN: Duration = Duration::from_millis(500);

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub trigger: ShutdownTrigger,
    pub aggregator: AggregatorStats,
    pub publisher: PublisherStats,
    /// False when the publisher was aborted at the end of the grace period.
    pub publisher_drained: bool,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    session: Option<DynSessionEngine>,
    lifecycle: Lifecycle,
    trigger_tx: mpsc::Sender<ShutdownTrigger>,
    trigger_rx: mpsc::Receiver<ShutdownTrigger>,
}

/// Handles of a started pipeline.
struct Pipeline {
    engine: DynSessionEngine,
    manager: Arc<ConnectionManager>,
    buffer: Arc<TickBuffer>,
    consumer_token: CancellationToken,
    consumer_task: JoinHandle<ConsumerExit>,
    aggregator_token: CancellationToken,
    aggregator_task: JoinHandle<AggregatorStats>,
    publisher_task: JoinHandle<PublisherStats>,
    publisher_stats: Arc<Mutex<PublisherStats>>,
    reader_task: JoinHandle<WsResult<()>>,
    background: Vec<JoinHandle<()>>,
}

impl Application {
    /// Create a new application from a validated config.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
        Ok(Self {
            config,
            session: None,
            lifecycle: Lifecycle::new(),
            trigger_tx,
            trigger_rx,
        })
    }

    /// Use `engine` instead of the session described by the config.
    pub fn with_session(mut self, engine: DynSessionEngine) -> Self {
        self.session = Some(engine);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Lifecycle state watcher.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Handle for requesting shutdown from outside.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.trigger_tx.clone())
    }

    /// Start the pipeline, run until the first shutdown trigger, then drain.
    ///
    /// Startup failures are returned without entering `Running`; whatever
    /// was already started is stopped first.
    pub async fn run(mut self) -> AppResult<RunReport> {
        info!(
            oracle = %self.config.oracle.url,
            session = ?self.config.session.kind,
            interval_ms = self.config.aggregation.interval_ms,
            "Starting proxy"
        );

        let pipeline = match self.start().await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(error = %e, "Startup failed");
                self.lifecycle.set(LifecycleState::Stopped);
                return Err(e);
            }
        };

        self.lifecycle.set(LifecycleState::Running);
        let trigger = self.wait_for_trigger().await;

        info!(%trigger, "Shutdown triggered");
        self.lifecycle.set(LifecycleState::Draining);
        let report = self.drain(pipeline, trigger).await;

        log_summary("Final metrics");
        self.lifecycle.set(LifecycleState::Stopped);
        Ok(report)
    }

    async fn start(&mut self) -> AppResult<Pipeline> {
        let whitelist = Arc::new(self.config.load_whitelist()?);
        info!(enabled = ?whitelist.enabled_symbols(), "Whitelist loaded");

        let engine = match self.session.take() {
            Some(engine) => engine,
            None => build_session(&self.config)?,
        };
        let (session_tx, session_rx) = mpsc::channel(self.config.session.channel_capacity.max(1));
        engine.start(session_tx).await?;
        info!(session = engine.name(), "Session started");

        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        let manager = Arc::new(ConnectionManager::new(
            ConnectionConfig::from(&self.config.oracle),
            notification_tx,
        ));
        let stream = match manager.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                engine.stop().await;
                return Err(e.into());
            }
        };
        Metrics::ws_connected();

        let shutdown = self.shutdown_handle();
        let reader_task = spawn_reader(manager.clone(), stream, shutdown.clone());
        let mut background = vec![tokio::spawn(log_notifications(notification_rx))];

        let handle = manager.write_handle();
        let client = ProductListClient::new(self.config.oracle.request_timeout());
        let accounts = match client.fetch_accounts(&handle).await {
            Ok(table) => Arc::new(table),
            Err(e) => {
                close_transport(&manager, reader_task, self.config.oracle.close_timeout()).await;
                for task in background {
                    task.abort();
                }
                engine.stop().await;
                return Err(e.into());
            }
        };
        warn_unresolved(&whitelist, &accounts);

        let sender: DynPriceSender = Arc::new(RpcPriceSender::new(
            handle,
            self.config.publisher.send_timeout(),
        ));
        if self.config.oracle.subscribe_prices {
            subscribe_accounts(sender.as_ref(), &accounts).await;
        }

        let buffer = Arc::new(TickBuffer::new());
        let (event_tx, event_rx) = mpsc::channel::<PriceEvent>(self.config.aggregation.channel_capacity);

        let publisher = Publisher::new(whitelist.clone(), accounts, sender);
        let publisher_stats = publisher.stats_handle();
        let publisher_task = tokio::spawn(publisher.run(event_rx));

        let aggregator_token = CancellationToken::new();
        let aggregator = Aggregator::new(buffer.clone(), event_tx, self.config.aggregation.interval());
        let aggregator_task = tokio::spawn(aggregator.run(aggregator_token.clone()));

        let consumer_token = CancellationToken::new();
        let consumer = SessionConsumer::new(buffer.clone(), whitelist, engine.clone());
        let consumer_task = {
            let token = consumer_token.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let exit = consumer.run(session_rx, token).await;
                if exit != ConsumerExit::Cancelled {
                    shutdown.trigger(ShutdownTrigger::SessionTerminated);
                }
                exit
            })
        };

        background.push(tokio::spawn(async move {
            interrupt_signal().await;
            info!("Interrupt received");
            shutdown.trigger(ShutdownTrigger::Interrupt);
        }));

        Ok(Pipeline {
            engine,
            manager,
            buffer,
            consumer_token,
            consumer_task,
            aggregator_token,
            aggregator_task,
            publisher_task,
            publisher_stats,
            reader_task,
            background,
        })
    }

    async fn wait_for_trigger(&mut self) -> ShutdownTrigger {
        let mut summary = summary_interval(self.config.telemetry.summary_interval_secs);
        loop {
            tokio::select! {
                trigger = self.trigger_rx.recv() => {
                    // `self` owns a sender, so the channel cannot close here.
                    return trigger.unwrap_or(ShutdownTrigger::Interrupt);
                }
                () = next_summary(&mut summary) => log_summary("Metrics summary"),
            }
        }
    }

    async fn drain(&self, pipeline: Pipeline, trigger: ShutdownTrigger) -> RunReport {
        let Pipeline {
            engine,
            manager,
            buffer,
            consumer_token,
            mut consumer_task,
            aggregator_token,
            aggregator_task,
            publisher_task,
            publisher_stats,
            reader_task,
            background,
        } = pipeline;

        let grace = self.config.shutdown.grace_period();

        // 1. No more ticks and no new cycle, whatever the consumer is doing.
        buffer.close();
        aggregator_token.cancel();
        consumer_token.cancel();
        match tokio::time::timeout(grace, &mut consumer_task).await {
            Ok(Ok(exit)) => debug!(?exit, "Session consumer stopped"),
            Ok(Err(e)) => warn!(error = %e, "Session consumer task failed"),
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Session consumer did not stop within grace period, aborting"
                );
                consumer_task.abort();
            }
        }

        // 2. The event channel closes with the aggregator.
        let aggregator = aggregator_task.await.unwrap_or_else(|e| {
            warn!(error = %e, "Aggregator task failed");
            AggregatorStats::default()
        });
        let discarded = buffer.pending_len();
        if discarded > 0 {
            info!(discarded, "Buffered ticks discarded at shutdown");
        }

        // 3. Publisher finishes queued events or is cut off.
        let (publisher, publisher_drained) =
            await_publisher(publisher_task, &publisher_stats, grace).await;

        // 4. Normal closure towards the oracle.
        close_transport(&manager, reader_task, self.config.oracle.close_timeout()).await;

        // 5. Release the session.
        if tokio::time::timeout(grace, engine.stop()).await.is_err() {
            warn!(session = engine.name(), "Session stop timed out");
        }
        for task in background {
            task.abort();
        }

        info!(
            %trigger,
            cycles = aggregator.cycles,
            events = aggregator.events_sent,
            abandoned = aggregator.events_abandoned,
            sent = publisher.calls_sent,
            failed = publisher.calls_failed,
            publisher_drained,
            "Drain complete"
        );

        RunReport {
            trigger,
            aggregator,
            publisher,
            publisher_drained,
        }
    }
}

fn build_session(config: &AppConfig) -> AppResult<DynSessionEngine> {
    let session = &config.session;
    let engine = match session.kind {
        SessionKind::Replay => {
            let path = session.replay_path.clone().ok_or_else(|| {
                AppError::Config("session.replay_path is required for a replay session".into())
            })?;
            ReplaySession::from_file(path, session.replay_interval())
        }
        SessionKind::Stdin => ReplaySession::stdin(session.replay_interval()),
    };
    Ok(Arc::new(engine.with_credential(session.credential())))
}

fn spawn_reader(
    manager: Arc<ConnectionManager>,
    stream: pfx_ws::WsStream,
    shutdown: ShutdownHandle,
) -> JoinHandle<WsResult<()>> {
    tokio::spawn(async move {
        let result = manager.run(stream).await;
        Metrics::ws_disconnected();
        if !manager.is_shutdown() {
            match &result {
                Ok(()) => warn!("Oracle connection ended"),
                Err(e) => warn!(error = %e, "Oracle connection lost"),
            }
            shutdown.trigger(ShutdownTrigger::TransportClosed);
        }
        result
    })
}

async fn log_notifications(mut rx: mpsc::Receiver<RpcNotification>) {
    while let Some(notification) = rx.recv().await {
        debug!(method = %notification.method, params = %notification.params, "Oracle notification");
    }
}

fn warn_unresolved(whitelist: &Whitelist, accounts: &AccountTable) {
    for symbol in whitelist.enabled_symbols() {
        if accounts.get(&symbol).is_none() {
            warn!(symbol = %symbol, "Whitelisted symbol has no oracle account");
        }
    }
}

/// Wait for the publisher for at most `grace`, aborting it afterwards.
///
/// Returns the final counters and whether the publisher drained on its own.
async fn await_publisher(
    mut task: JoinHandle<PublisherStats>,
    stats: &Mutex<PublisherStats>,
    grace: Duration,
) -> (PublisherStats, bool) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(final_stats)) => (final_stats, true),
        Ok(Err(e)) => {
            warn!(error = %e, "Publisher task failed");
            (*stats.lock(), false)
        }
        Err(_) => {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Publisher did not drain within grace period, aborting"
            );
            task.abort();
            (*stats.lock(), false)
        }
    }
}

/// Ask the connection to close and wait for its reader to finish.
async fn close_transport(
    manager: &ConnectionManager,
    mut reader: JoinHandle<WsResult<()>>,
    close_timeout: Duration,
) {
    manager.shutdown();
    match tokio::time::timeout(close_timeout + CLOSE_MARGIN, &mut reader).await {
        Ok(Ok(Ok(()))) => debug!("Oracle connection closed"),
        Ok(Ok(Err(e))) => debug!(error = %e, "Oracle connection had already failed"),
        Ok(Err(e)) => warn!(error = %e, "Oracle reader task failed"),
        Err(_) => {
            warn!("Oracle reader did not stop, aborting");
            reader.abort();
        }
    }
}

fn summary_interval(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_summary(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_summary(message: &'static str) {
    let s = Metrics::summary();
    info!(
        ticks_recorded = s.ticks_recorded,
        ticks_rejected = s.ticks_rejected,
        cycles = s.cycles,
        price_events = s.price_events,
        events_dropped = s.events_dropped,
        updates_sent = s.updates_sent,
        updates_failed = s.updates_failed,
        "{message}"
    );
}
