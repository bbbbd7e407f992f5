//! Lifecycle state and shutdown triggers.

use pfx_telemetry::Metrics;
use std::fmt;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the proxy started draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Ctrl-C, SIGTERM or an embedder request.
    Interrupt,
    /// The session ended or its event channel closed.
    SessionTerminated,
    /// The oracle connection closed or failed.
    TransportClosed,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownTrigger::Interrupt => "interrupt",
            ShutdownTrigger::SessionTerminated => "session_terminated",
            ShutdownTrigger::TransportClosed => "transport_closed",
        };
        f.write_str(s)
    }
}

/// Publishes the lifecycle state to watchers and the state gauge.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Starting);
        Metrics::lifecycle_state_set(LifecycleState::Starting.as_str());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: LifecycleState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Lifecycle transition");
        }
        Metrics::lifecycle_state_set(state.as_str());
    }
}

/// Cloneable sender side of the trigger channel. The first trigger wins;
/// later ones are ignored.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::Sender<ShutdownTrigger>,
}

impl ShutdownHandle {
    pub fn new(tx: mpsc::Sender<ShutdownTrigger>) -> Self {
        Self { tx }
    }

    pub fn trigger(&self, trigger: ShutdownTrigger) {
        if self.tx.try_send(trigger).is_err() {
            info!(%trigger, "Shutdown already in progress");
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn interrupt_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
