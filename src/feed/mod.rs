//! Market data feed module
//!
//! Normalizes heterogeneous exchange wire messages into canonical
//! [`Event`] records and tracks delivery latency.

mod binance;
mod latency;
mod types;

pub use binance::BinanceFeed;
pub use latency::{LatencySummary, LatencyTracker};
pub use types::{Event, EventPayload, Side};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::config::FeedConfig;
use crate::ws::ConnectorState;

/// Trait for market feed implementations
#[async_trait]
pub trait MarketFeed: Send + Sync + std::fmt::Debug {
    /// Subscribe to normalized events; also returns the connector state
    /// watch for the health surface.
    async fn subscribe(
        &self,
    ) -> anyhow::Result<(mpsc::Receiver<Event>, watch::Receiver<ConnectorState>)>;
}

/// Construct the adapter for the configured exchange.
///
/// A venue whose adapter does not exist is a configuration error, caught
/// here before anything connects; a new venue only has to implement
/// [`MarketFeed`] and add an arm.
pub fn feed_for(config: &FeedConfig) -> anyhow::Result<Box<dyn MarketFeed>> {
    match config.exchange.to_ascii_lowercase().as_str() {
        "binance" => Ok(Box::new(BinanceFeed::new(config))),
        other => anyhow::bail!("unsupported exchange {:?} (supported: binance)", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_config(exchange: &str) -> FeedConfig {
        toml::from_str(&format!(
            r#"
            exchange = "{}"
            ws_url = "wss://stream.binance.com:9443"
            symbols = ["BTCUSDT"]
            "#,
            exchange
        ))
        .unwrap()
    }

    #[test]
    fn test_feed_dispatches_on_exchange() {
        assert!(feed_for(&feed_config("binance")).is_ok());
        assert!(feed_for(&feed_config("Binance")).is_ok());
    }

    #[test]
    fn test_unknown_exchange_is_rejected() {
        let err = feed_for(&feed_config("coinbase")).unwrap_err();
        assert!(err.to_string().contains("unsupported exchange"));
    }
}
