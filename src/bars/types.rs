//! Bar model and canonical content identity

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Aggregate of all events in one fixed-width window for one symbol.
///
/// OHLC and vwap come from trades only and are None for gap windows;
/// bid/ask are the last quote known before the window closed, carried
/// forward from earlier windows when none arrived in this one.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub window_start: DateTime<Utc>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume_base: Decimal,
    pub volume_quote: Decimal,
    pub trade_count: u64,
    pub vwap: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub spread: Option<Decimal>,
}

impl Bar {
    /// A window that saw zero trades. Recorded, never interpolated.
    pub fn is_gap(&self) -> bool {
        self.trade_count == 0
    }

    /// Canonical text encoding used for content hashing.
    ///
    /// One line per bar, fields comma-separated in schema order, None as
    /// the empty string. Decimal's `to_string` preserves scale, so equal
    /// inputs always reproduce equal lines.
    pub fn canonical_line(&self) -> String {
        fn opt(d: Option<Decimal>) -> String {
            d.map(|v| v.to_string()).unwrap_or_default()
        }
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.symbol,
            self.window_start.timestamp_micros(),
            opt(self.open),
            opt(self.high),
            opt(self.low),
            opt(self.close),
            self.volume_base,
            self.volume_quote,
            self.trade_count,
            opt(self.vwap),
            opt(self.bid),
            opt(self.ask),
            opt(self.spread),
        )
    }
}

/// SHA-256 over the canonical encoding of a bar sequence.
///
/// This is the archive's content hash: independent of Parquet framing, so
/// re-encoding identical rows always reproduces it.
pub fn canonical_hash(bars: &[Bar]) -> String {
    let mut hasher = Sha256::new();
    for bar in bars {
        hasher.update(bar.canonical_line().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
