//! Canonical event model
//!
//! All exchange wire shapes are normalized into [`Event`] at the feed
//! boundary; nothing downstream branches on raw message shape.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade aggressor side (Binance `m` flag: buyer-is-maker means a sell hit
/// the bid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Kind-specific payload of an event.
///
/// Serialized with a `kind` tag and flattened into the record, so the JSONL
/// wire form is `{"symbol":...,"ts_event":...,"ts_recv":...,"kind":"trade",
/// "price":...,"qty":...,"side":...,"trade_id":...}` for trades and
/// `{...,"kind":"quote","bid":...,"ask":...}` for quotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventPayload {
    Trade {
        price: Decimal,
        qty: Decimal,
        side: Side,
        /// Exchange-assigned id, the trade deduplication key
        trade_id: u64,
    },
    Quote {
        bid: Decimal,
        ask: Decimal,
    },
}

/// One normalized trade or top-of-book quote update.
///
/// Immutable once written: the writer appends it to a segment and nothing
/// ever mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Trading symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Exchange-assigned event time (millisecond precision)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts_event: DateTime<Utc>,
    /// Local arrival time
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts_recv: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn is_trade(&self) -> bool {
        matches!(self.payload, EventPayload::Trade { .. })
    }

    pub fn is_quote(&self) -> bool {
        matches!(self.payload, EventPayload::Quote { .. })
    }

    /// Delivery latency in milliseconds. Can be skewed by the exchange's
    /// event clock; observability only, not a transport-latency bound.
    pub fn latency_ms(&self) -> i64 {
        (self.ts_recv - self.ts_event).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn trade_event() -> Event {
        Event {
            symbol: "BTCUSDT".to_string(),
            ts_event: Utc.timestamp_millis_opt(1704067200123).unwrap(),
            ts_recv: Utc.timestamp_millis_opt(1704067200200).unwrap(),
            payload: EventPayload::Trade {
                price: dec!(42500.50),
                qty: dec!(0.001),
                side: Side::Buy,
                trade_id: 123456789,
            },
        }
    }

    #[test]
    fn test_trade_jsonl_round_trip() {
        let event = trade_event();
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"kind\":\"trade\""));
        assert!(line.contains("\"trade_id\":123456789"));
        assert!(line.contains("\"ts_event\":1704067200123"));

        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_quote_jsonl_round_trip() {
        let event = Event {
            symbol: "BTCUSDT".to_string(),
            ts_event: Utc.timestamp_millis_opt(1704067200123).unwrap(),
            ts_recv: Utc.timestamp_millis_opt(1704067200150).unwrap(),
            payload: EventPayload::Quote {
                bid: dec!(42500.00),
                ask: dec!(42500.10),
            },
        };
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"kind\":\"quote\""));

        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, event);
        assert!(parsed.is_quote());
        assert!(!parsed.is_trade());
    }

    #[test]
    fn test_latency_ms() {
        let event = trade_event();
        assert_eq!(event.latency_ms(), 77);
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let line = r#"{"symbol":"X","ts_event":1,"ts_recv":2,"kind":"heartbeat"}"#;
        assert!(serde_json::from_str::<Event>(line).is_err());
    }
}
