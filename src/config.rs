//! Configuration types for tickvault

use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub compactor: CompactorConfig,
    pub telemetry: TelemetryConfig,
}

/// Feed connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Exchange name (currently only "binance")
    pub exchange: String,
    /// WebSocket base URL, e.g. "wss://stream.binance.com:9443"
    pub ws_url: String,
    /// Symbols to subscribe to, e.g. ["BTCUSDT", "ETHUSDT"]
    pub symbols: Vec<String>,

    /// Initial reconnect backoff delay (seconds)
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// Maximum reconnect backoff delay (seconds)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// A connection stable for this long resets backoff to the initial delay
    #[serde(default = "default_stable_reset_secs")]
    pub stable_reset_secs: u64,

    /// No message for this long triggers a reconnect
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Rolling window size for latency percentile tracking
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

fn default_initial_backoff_secs() -> u64 {
    1
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_stable_reset_secs() -> u64 {
    60
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_latency_window() -> usize {
    1000
}

/// Raw segment storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory; raw segments go under `raw/`, bars under `bars/`
    pub base_dir: PathBuf,

    /// Rotation interval for open segments (seconds, aligned to boundaries)
    #[serde(default = "default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,

    /// Size ceiling for a segment; whichever of time/size trips first rotates
    #[serde(default = "default_max_segment_bytes")]
    pub max_segment_bytes: u64,

    /// Bounded capacity of each per-symbol writer channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_rotation_interval_secs() -> u64 {
    60
}
fn default_max_segment_bytes() -> u64 {
    64 * 1024 * 1024
}
fn default_channel_capacity() -> usize {
    4096
}

impl StorageConfig {
    /// Root of the raw segment tree
    pub fn raw_root(&self) -> PathBuf {
        self.base_dir.join("raw")
    }

    /// Root of the bar partition / archive tree
    pub fn bars_root(&self) -> PathBuf {
        self.base_dir.join("bars")
    }
}

/// Bar aggregation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Fixed bar window width (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Ceiling for a single aggregation job before it is killed
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_window_secs() -> u64 {
    1
}
fn default_job_timeout_secs() -> u64 {
    600
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

/// Daily compaction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompactorConfig {
    /// Ceiling for a single compaction job before it is killed
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub metrics_port: u16,
    pub log_level: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Parse a `YYYY-MM-DD` date argument, defaulting to today's UTC date.
pub fn resolve_date(date: Option<&str>) -> anyhow::Result<NaiveDate> {
    match date {
        Some(d) => Ok(NaiveDate::parse_from_str(d, "%Y-%m-%d")?),
        None => Ok(chrono::Utc::now().date_naive()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [feed]
        exchange = "binance"
        ws_url = "wss://stream.binance.com:9443"
        symbols = ["BTCUSDT", "ETHUSDT"]

        [storage]
        base_dir = "./data"
        rotation_interval_secs = 60
        max_segment_bytes = 1048576

        [aggregator]
        window_secs = 1

        [telemetry]
        metrics_port = 9090
        log_level = "info"
    "#;

    #[test]
    fn test_config_deserialize() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.feed.exchange, "binance");
        assert_eq!(config.feed.symbols.len(), 2);
        assert_eq!(config.storage.rotation_interval_secs, 60);
        assert_eq!(config.aggregator.window_secs, 1);
    }

    #[test]
    fn test_feed_defaults_applied() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.feed.initial_backoff_secs, 1);
        assert_eq!(config.feed.max_backoff_secs, 60);
        assert_eq!(config.feed.idle_timeout_secs, 60);
        assert_eq!(config.feed.latency_window, 1000);
    }

    #[test]
    fn test_optional_sections_default() {
        let toml = r#"
            [feed]
            exchange = "binance"
            ws_url = "wss://stream.binance.com:9443"
            symbols = ["BTCUSDT"]

            [storage]
            base_dir = "./data"

            [telemetry]
            metrics_port = 9090
            log_level = "info"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.aggregator.window_secs, 1);
        assert_eq!(config.compactor.job_timeout_secs, 600);
        assert_eq!(config.storage.max_segment_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_storage_roots() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.storage.raw_root(), PathBuf::from("./data/raw"));
        assert_eq!(config.storage.bars_root(), PathBuf::from("./data/bars"));
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_date() {
        let d = resolve_date(Some("2025-01-04")).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 1, 4).unwrap());
        assert!(resolve_date(Some("not-a-date")).is_err());
        assert_eq!(resolve_date(None).unwrap(), chrono::Utc::now().date_naive());
    }
}
