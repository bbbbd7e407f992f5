//! Application configuration.
//!
//! Loaded from a TOML file. Every field has a default so a minimal file
//! only needs the session source and the whitelist.

use crate::error::{AppError, AppResult};
use pfx_core::Whitelist;
use pfx_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// JSON file of `{"SYMBOL": bool}` entries.
    #[serde(default)]
    pub whitelist_path: Option<PathBuf>,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Inline whitelist entries, applied over the file.
    #[serde(default)]
    pub whitelist: BTreeMap<String, bool>,
}

// ============================================================================
// Oracle
// ============================================================================

/// pythd WebSocket endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_url")]
    pub url: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for `get_product_list`.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Send `subscribe_price` for every resolved account at startup.
    #[serde(default)]
    pub subscribe_prices: bool,

    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_oracle_url() -> String {
    "ws://localhost:8910/".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_close_timeout_ms() -> u64 {
    1000
}

fn default_outbound_capacity() -> usize {
    1024
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: default_oracle_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            subscribe_prices: false,
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl OracleConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl From<&OracleConfig> for ConnectionConfig {
    fn from(cfg: &OracleConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            connect_timeout_ms: cfg.connect_timeout_ms,
            close_timeout_ms: cfg.close_timeout_ms,
            outbound_capacity: cfg.outbound_capacity,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Market-data session source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// JSON lines from `replay_path`.
    #[default]
    Replay,
    /// JSON lines from standard input.
    Stdin,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub kind: SessionKind,

    #[serde(default)]
    pub replay_path: Option<PathBuf>,

    /// Pause between replayed lines.
    #[serde(default)]
    pub replay_interval_ms: u64,

    /// Shared session credential. Empty means none.
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_session_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_session_channel_capacity() -> usize {
    1024
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kind: SessionKind::default(),
            replay_path: None,
            replay_interval_ms: 0,
            password: String::new(),
            channel_capacity: default_session_channel_capacity(),
        }
    }
}

// Keeps the credential out of logs.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("kind", &self.kind)
            .field("replay_path", &self.replay_path)
            .field("replay_interval_ms", &self.replay_interval_ms)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl SessionConfig {
    pub fn credential(&self) -> Option<String> {
        (!self.password.is_empty()).then(|| self.password.clone())
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Cycle period.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// PriceEvent channel depth between aggregator and publisher.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_interval_ms() -> u64 {
    400
}

fn default_channel_capacity() -> usize {
    1000
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl AggregationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_send_timeout_ms() -> u64 {
    2000
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl PublisherConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long the publisher, or a stuck session consumer, may keep draining after the trigger.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    1000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Period of the metrics summary log line. Zero disables it.
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
}

fn default_summary_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            summary_interval_secs: default_summary_interval_secs(),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            whitelist_path: None,
            oracle: OracleConfig::default(),
            session: SessionConfig::default(),
            aggregation: AggregationConfig::default(),
            publisher: PublisherConfig::default(),
            shutdown: ShutdownConfig::default(),
            telemetry: TelemetryConfig::default(),
            whitelist: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Point the oracle at `addr`.
    ///
    /// A bare `host:port` becomes `ws://host:port/`; a full URL is used as is.
    pub fn override_addr(&mut self, addr: &str) {
        self.oracle.url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("ws://{addr}/")
        };
    }

    pub fn validate(&self) -> AppResult<()> {
        let url = self.oracle.url.trim();
        if url.is_empty() {
            return Err(AppError::Config("oracle.url must not be empty".into()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "oracle.url must be a ws:// or wss:// URL, got {url}"
            )));
        }
        if self.aggregation.interval_ms == 0 {
            return Err(AppError::Config("aggregation.interval_ms must be > 0".into()));
        }
        if self.aggregation.channel_capacity == 0 {
            return Err(AppError::Config(
                "aggregation.channel_capacity must be > 0".into(),
            ));
        }
        if self.session.kind == SessionKind::Replay && self.session.replay_path.is_none() {
            return Err(AppError::Config(
                "session.replay_path is required for a replay session".into(),
            ));
        }
        Ok(())
    }

    /// Whitelist from `whitelist_path` with the inline entries merged over it.
    pub fn load_whitelist(&self) -> AppResult<Whitelist> {
        let mut whitelist = match &self.whitelist_path {
            Some(path) => Whitelist::from_file(path)?,
            None => Whitelist::default(),
        };
        whitelist.merge(&Whitelist::from_entries(
            self.whitelist.iter().map(|(symbol, enabled)| (symbol.as_str(), *enabled)),
        ));

        if whitelist.enabled_symbols().is_empty() {
            warn!("Whitelist has no enabled symbol, nothing will be published");
        }
        Ok(whitelist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.oracle.url, "ws://localhost:8910/");
        assert_eq!(config.aggregation.interval_ms, 400);
        assert_eq!(config.aggregation.channel_capacity, 1000);
        assert_eq!(config.publisher.send_timeout_ms, 2000);
        assert_eq!(config.shutdown.grace_period_ms, 1000);
        assert_eq!(config.oracle.close_timeout_ms, 1000);
        assert!(!config.oracle.subscribe_prices);
    }

    #[test]
    fn test_parse_full_file() {
        let config = AppConfig::from_toml(
            r#"
            whitelist_path = "white_list.json"

            [oracle]
            url = "ws://pythd:8910/"
            subscribe_prices = true

            [session]
            kind = "replay"
            replay_path = "ticks.jsonl"
            password = "secret"

            [aggregation]
            interval_ms = 250

            [whitelist]
            XAUUSD = true
            EURUSD = false
            "#,
        )
        .unwrap();

        assert_eq!(config.oracle.url, "ws://pythd:8910/");
        assert!(config.oracle.subscribe_prices);
        assert_eq!(config.oracle.connect_timeout_ms, 5000);
        assert_eq!(config.session.replay_path, Some(PathBuf::from("ticks.jsonl")));
        assert_eq!(config.session.credential().as_deref(), Some("secret"));
        assert_eq!(config.aggregation.interval_ms, 250);
        assert_eq!(config.aggregation.channel_capacity, 1000);
        assert_eq!(config.whitelist.get("EURUSD"), Some(&false));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.session.password = "hunter2".into();
        let dump = format!("{config:?}");
        assert!(!dump.contains("hunter2"));
        assert!(dump.contains("***"));
    }

    #[test]
    fn test_unknown_session_kind_is_rejected() {
        let err = AppConfig::from_toml("[session]\nkind = \"fix\"\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.session.replay_path = Some("ticks.jsonl".into());
        assert!(config.validate().is_ok());

        let mut zero_interval = config.clone();
        zero_interval.aggregation.interval_ms = 0;
        assert!(zero_interval.validate().is_err());

        let mut zero_capacity = config.clone();
        zero_capacity.aggregation.channel_capacity = 0;
        assert!(zero_capacity.validate().is_err());

        let mut empty_url = config.clone();
        empty_url.oracle.url = " ".into();
        assert!(empty_url.validate().is_err());

        let mut http_url = config.clone();
        http_url.oracle.url = "http://localhost:8910".into();
        assert!(http_url.validate().is_err());

        let mut no_path = config.clone();
        no_path.session.replay_path = None;
        assert!(no_path.validate().is_err());

        let mut stdin = no_path;
        stdin.session.kind = SessionKind::Stdin;
        assert!(stdin.validate().is_ok());
    }

    #[test]
    fn test_override_addr() {
        let mut config = AppConfig::default();
        config.override_addr("10.0.0.5:9000");
        assert_eq!(config.oracle.url, "ws://10.0.0.5:9000/");

        config.override_addr("wss://oracle.example:443/ws");
        assert_eq!(config.oracle.url, "wss://oracle.example:443/ws");
    }

    #[test]
    fn test_connection_config_from_oracle() {
        let mut oracle = OracleConfig::default();
        oracle.close_timeout_ms = 250;
        let conn = ConnectionConfig::from(&oracle);
        assert_eq!(conn.url, oracle.url);
        assert_eq!(conn.close_timeout_ms, 250);
        assert_eq!(conn.outbound_capacity, 1024);
    }

    #[test]
    fn test_load_whitelist_merges_inline_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"XAUUSD": true, "EURUSD": true, "GBPUSD": false}}"#).unwrap();

        let mut config = AppConfig::default();
        config.whitelist_path = Some(file.path().to_path_buf());
        config.whitelist.insert("EURUSD".into(), false);
        config.whitelist.insert("BTCUSD".into(), true);

        let whitelist = config.load_whitelist().unwrap();
        assert_eq!(whitelist.enabled_symbols(), vec!["BTCUSD", "XAUUSD"]);
    }

    #[test]
    fn test_load_whitelist_unparsable_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let mut config = AppConfig::default();
        config.whitelist_path = Some(file.path().to_path_buf());
        assert!(matches!(config.load_whitelist(), Err(AppError::Core(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::from_file("/nonexistent/pfx.toml").unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("Failed to read")));
    }
}
