//! Publish loop.
//!
//! Per event: whitelist check, account lookup, then one `update_price` per
//! account. A failing account is logged and counted; the remaining accounts
//! and later events are unaffected.

use crate::error::PublishError;
use crate::sender::{DynPriceSender, PriceSender, UpdatePriceParams};
use parking_lot::Mutex;
use pfx_core::{OracleAccount, PriceEvent, Whitelist};
use pfx_registry::AccountTable;
use pfx_telemetry::Metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Running publisher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub events_seen: u64,
    pub events_dropped: u64,
    pub calls_sent: u64,
    pub calls_failed: u64,
}

pub struct Publisher {
    whitelist: Arc<Whitelist>,
    accounts: Arc<AccountTable>,
    sender: DynPriceSender,
    stats: Arc<Mutex<PublisherStats>>,
}

impl Publisher {
    pub fn new(whitelist: Arc<Whitelist>, accounts: Arc<AccountTable>, sender: DynPriceSender) -> Self {
        Self {
            whitelist,
            accounts,
            sender,
            stats: Arc::new(Mutex::new(PublisherStats::default())),
        }
    }

    /// Shared counters, readable while `run` is in progress or after it
    /// was aborted.
    pub fn stats_handle(&self) -> Arc<Mutex<PublisherStats>> {
        self.stats.clone()
    }

    pub fn stats(&self) -> PublisherStats {
        *self.stats.lock()
    }

    /// Publish until the channel is closed and drained.
    pub async fn run(self, mut rx: mpsc::Receiver<PriceEvent>) -> PublisherStats {
        info!(
            symbols = self.accounts.len(),
            accounts = self.accounts.account_count(),
            "Publisher started"
        );

        while let Some(event) = rx.recv().await {
            self.publish_event(&event).await;
        }

        let stats = self.stats();
        info!(
            seen = stats.events_seen,
            dropped = stats.events_dropped,
            sent = stats.calls_sent,
            failed = stats.calls_failed,
            "Publisher drained"
        );
        stats
    }

    pub async fn publish_event(&self, event: &PriceEvent) {
        self.stats.lock().events_seen += 1;

        if !self.whitelist.is_eligible(&event.symbol) {
            debug!(symbol = %event.symbol, "Not whitelisted, dropping event");
            self.drop_event("not_whitelisted");
            return;
        }

        let Some(accounts) = self.accounts.get(&event.symbol) else {
            debug!(symbol = %event.symbol, "No oracle account, dropping event");
            self.drop_event("no_accounts");
            return;
        };

        for account in accounts {
            let started = Instant::now();
            match self.publish_to(event, account).await {
                Ok(()) => {
                    Metrics::update_price_sent(started.elapsed().as_secs_f64() * 1000.0);
                    self.stats.lock().calls_sent += 1;
                }
                Err(e) => {
                    warn!(
                        symbol = %event.symbol,
                        account = %account.address,
                        error = %e,
                        "update_price failed"
                    );
                    Metrics::update_price_failed(e.reason());
                    self.stats.lock().calls_failed += 1;
                }
            }
        }
    }

    async fn publish_to(&self, event: &PriceEvent, account: &OracleAccount) -> Result<(), PublishError> {
        let price = event.price.to_fixed_point(account.exponent)?;
        let conf = event.confidence.to_fixed_point(account.exponent)?;
        debug!(
            symbol = %event.symbol,
            side = %event.side,
            account = %account.address,
            price,
            conf,
            "Publishing"
        );
        self.sender
            .update_price(UpdatePriceParams::trading(account.address.clone(), price, conf))
            .await
    }

    fn drop_event(&self, reason: &str) {
        Metrics::event_dropped(reason);
        self.stats.lock().events_dropped += 1;
    }
}

/// Send `subscribe_price` for every resolved account.
///
/// Returns `(subscribed, failed)`.
pub async fn subscribe_accounts(sender: &dyn PriceSender, table: &AccountTable) -> (usize, usize) {
    let mut ok = 0usize;
    let mut failed = 0usize;
    for account in table.all_accounts() {
        match sender.subscribe_price(&account.address).await {
            Ok(()) => ok += 1,
            Err(e) => {
                warn!(account = %account.address, error = %e, "subscribe_price failed");
                failed += 1;
            }
        }
    }
    info!(subscribed = ok, failed, "Price account subscriptions sent");
    (ok, failed)
}
