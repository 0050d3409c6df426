//! Binance WebSocket feed
//!
//! Subscribes to combined `@trade` + `@bookTicker` streams for a symbol set
//! and normalizes both wire shapes into canonical [`Event`]s.

use super::latency::LatencyTracker;
use super::{Event, EventPayload, MarketFeed, Side};
use crate::config::FeedConfig;
use crate::telemetry::metrics;
use crate::ws::{ConnectorState, WsClient, WsConfig, WsMessage};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// How often the rolling latency summary is logged
const LATENCY_SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

/// Binance trade payload (`e = "trade"`)
#[derive(Debug, Deserialize)]
struct BinanceTrade {
    /// Symbol
    #[serde(rename = "s")]
    symbol: String,
    /// Event time (milliseconds)
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
    /// Trade time (milliseconds)
    #[serde(rename = "T", default)]
    trade_time: Option<i64>,
    /// Trade ID
    #[serde(rename = "t")]
    trade_id: u64,
    /// Price
    #[serde(rename = "p")]
    price: String,
    /// Quantity
    #[serde(rename = "q")]
    qty: String,
    /// Buyer is the maker (true means a sell hit the bid)
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

/// Binance best bid/ask payload (`bookTicker`; carries no event timestamp)
#[derive(Debug, Deserialize)]
struct BinanceBookTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
}

/// Binance feed over one combined stream for a set of symbols
#[derive(Debug)]
pub struct BinanceFeed {
    ws_url: String,
    symbols: Vec<String>,
    initial_backoff: Duration,
    max_backoff: Duration,
    stable_reset: Duration,
    idle_timeout: Duration,
    latency_window: usize,
}

impl BinanceFeed {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
            symbols: config.symbols.iter().map(|s| s.to_lowercase()).collect(),
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            stable_reset: Duration::from_secs(config.stable_reset_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            latency_window: config.latency_window,
        }
    }

    /// Build the combined-stream URL, e.g.
    /// `wss://host/stream?streams=btcusdt@trade/btcusdt@bookTicker`
    fn build_ws_url(&self) -> String {
        let topics: Vec<String> = self
            .symbols
            .iter()
            .flat_map(|s| [format!("{}@trade", s), format!("{}@bookTicker", s)])
            .collect();
        format!("{}/stream?streams={}", self.ws_url, topics.join("/"))
    }

    /// Normalize one wire message into an [`Event`].
    ///
    /// Handles both the combined-stream envelope (`{"stream":...,"data":...}`)
    /// and bare payloads. Returns None for anything malformed or of an
    /// unhandled type; the caller counts and drops those.
    fn parse_message(msg: &str, now: DateTime<Utc>) -> Option<Event> {
        let mut value: serde_json::Value = serde_json::from_str(msg).ok()?;

        let stream = value
            .get("stream")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        let data = match stream {
            Some(_) => value.get_mut("data")?.take(),
            None => value,
        };

        let kind = match &stream {
            Some(s) if s.contains("@trade") => "trade",
            Some(s) if s.contains("@bookTicker") => "bookTicker",
            _ => match data.get("e").and_then(|e| e.as_str()) {
                Some("trade") => "trade",
                Some("bookTicker") => "bookTicker",
                // bookTicker payloads carry no "e"; recognize them by shape
                None if data.get("b").is_some() && data.get("a").is_some() => "bookTicker",
                _ => return None,
            },
        };

        match kind {
            "trade" => {
                let t: BinanceTrade = serde_json::from_value(data).ok()?;
                let ts_ms = t.event_time.or(t.trade_time)?;
                Some(Event {
                    symbol: t.symbol,
                    ts_event: Utc.timestamp_millis_opt(ts_ms).single()?,
                    ts_recv: now,
                    payload: EventPayload::Trade {
                        price: Decimal::from_str(&t.price).ok()?,
                        qty: Decimal::from_str(&t.qty).ok()?,
                        side: if t.buyer_is_maker {
                            Side::Sell
                        } else {
                            Side::Buy
                        },
                        trade_id: t.trade_id,
                    },
                })
            }
            "bookTicker" => {
                let q: BinanceBookTicker = serde_json::from_value(data).ok()?;
                // No exchange timestamp on spot bookTicker; receipt time
                // stands in for both.
                Some(Event {
                    symbol: q.symbol,
                    ts_event: now,
                    ts_recv: now,
                    payload: EventPayload::Quote {
                        bid: Decimal::from_str(&q.bid).ok()?,
                        ask: Decimal::from_str(&q.ask).ok()?,
                    },
                })
            }
            _ => None,
        }
    }

    /// Drain raw WebSocket messages, normalize, and forward events.
    ///
    /// A full downstream channel blocks here, which in turn stalls the
    /// socket read: durability wins over feed liveness.
    async fn run_message_loop(
        mut ws_rx: mpsc::Receiver<WsMessage>,
        event_tx: mpsc::Sender<Event>,
        latency_window: usize,
    ) {
        let mut tracker = LatencyTracker::new(latency_window);
        let mut last_summary = Instant::now();
        let mut dropped: u64 = 0;

        while let Some(msg) = ws_rx.recv().await {
            match msg {
                WsMessage::Text(text) => {
                    let now = Utc::now();
                    match Self::parse_message(&text, now) {
                        Some(event) => {
                            tracker.record(event.latency_ms());
                            metrics::record_feed_latency(event.latency_ms() as f64);
                            metrics::incr_event(if event.is_trade() { "trade" } else { "quote" });

                            if event_tx.send(event).await.is_err() {
                                tracing::debug!("Event receiver dropped, stopping feed");
                                break;
                            }
                        }
                        None => {
                            dropped += 1;
                            metrics::incr_dropped_message();
                            tracing::debug!(msg = %text, "Dropped unparseable message");
                        }
                    }

                    if last_summary.elapsed() >= LATENCY_SUMMARY_INTERVAL {
                        if let Some(s) = tracker.summary() {
                            if s.is_high() {
                                tracing::warn!(
                                    p50_ms = s.p50_ms,
                                    p95_ms = s.p95_ms,
                                    max_ms = s.max_ms,
                                    count = s.count,
                                    dropped,
                                    "High feed latency"
                                );
                            } else {
                                tracing::info!(
                                    p50_ms = s.p50_ms,
                                    p95_ms = s.p95_ms,
                                    max_ms = s.max_ms,
                                    count = s.count,
                                    dropped,
                                    "Feed latency summary"
                                );
                            }
                        }
                        last_summary = Instant::now();
                    }
                }
                WsMessage::Connected => {
                    tracing::info!("Binance feed connected");
                }
                WsMessage::Disconnected => {
                    tracing::warn!("Binance feed disconnected");
                    break;
                }
                WsMessage::Reconnecting { attempt } => {
                    metrics::incr_reconnect();
                    tracing::warn!(attempt, "Binance feed reconnecting...");
                }
            }
        }
    }
}

#[async_trait]
impl MarketFeed for BinanceFeed {
    async fn subscribe(
        &self,
    ) -> anyhow::Result<(mpsc::Receiver<Event>, watch::Receiver<ConnectorState>)> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let url = self.build_ws_url();

        tracing::info!(symbols = ?self.symbols, url = %url, "Subscribing to Binance feed");

        let config = WsConfig::new(url)
            .initial_delay(self.initial_backoff)
            .max_delay(self.max_backoff)
            .stable_reset(self.stable_reset)
            .idle_read_timeout(self.idle_timeout)
            .ping_interval(Duration::from_secs(30));

        let client = WsClient::new(config);
        let (ws_rx, state_rx) = client.connect();

        let latency_window = self.latency_window;
        tokio::spawn(async move {
            Self::run_message_loop(ws_rx, event_tx, latency_window).await;
        });

        Ok((event_rx, state_rx))
    }
}
