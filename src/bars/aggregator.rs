//! Deterministic bar aggregation
//!
//! Reads a symbol/day's closed segments, dedups trades by exchange id,
//! sorts by (event time, receipt time) with a stable sort so read order
//! breaks remaining ties, and emits one bar per window across the covered
//! range. Re-running over the same segments reproduces the output
//! byte-for-byte.

use super::parquet::{partition_dir, write_bars};
use super::Bar;
use crate::config::{AggregatorConfig, StorageConfig};
use crate::feed::{Event, EventPayload};
use crate::segment::{list_closed_segments, read_segment};
use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome summary of one aggregation run
#[derive(Debug, Default)]
pub struct AggregateReport {
    pub segments_read: usize,
    pub events_read: usize,
    pub trades_deduped: u64,
    pub quotes_deduped: u64,
    pub discarded_bytes: u64,
    pub malformed_lines: u64,
    pub bar_count: usize,
    pub gap_count: usize,
    pub partition_file: Option<PathBuf>,
}

/// Batch bar aggregation job, invoked per symbol/date
pub struct Aggregator {
    raw_root: PathBuf,
    bars_root: PathBuf,
    window_ms: i64,
}

impl Aggregator {
    pub fn new(storage: &StorageConfig, config: &AggregatorConfig) -> Self {
        Self {
            raw_root: storage.raw_root(),
            bars_root: storage.bars_root(),
            window_ms: (config.window_secs.max(1) * 1000) as i64,
        }
    }

    /// Aggregate one symbol/day into a Parquet partition.
    ///
    /// Only closed segments are opened, so this is safe to run while
    /// ingestion is live. Idempotent: a re-run replaces the partition
    /// file atomically.
    pub fn aggregate(&self, symbol: &str, date: NaiveDate) -> anyhow::Result<AggregateReport> {
        self.aggregate_with_cancel(symbol, date, &AtomicBool::new(false))
    }

    /// Like [`aggregate`](Self::aggregate), but skips the commit once
    /// `cancel` is set. The deadline supervisor sets the flag when a job
    /// overruns: the blocking thread cannot be killed, but it then
    /// finishes without publishing anything.
    pub fn aggregate_with_cancel(
        &self,
        symbol: &str,
        date: NaiveDate,
        cancel: &AtomicBool,
    ) -> anyhow::Result<AggregateReport> {
        let segments = list_closed_segments(&self.raw_root, symbol, date)?;
        let mut report = AggregateReport {
            segments_read: segments.len(),
            ..Default::default()
        };

        if segments.is_empty() {
            tracing::warn!(symbol, %date, "No closed segments to aggregate");
            return Ok(report);
        }

        // Segments are consumed in part order, so within a symbol the read
        // order is receipt order; dedup keeps the earliest-received copy.
        let mut trades: Vec<Event> = Vec::new();
        let mut quotes: Vec<Event> = Vec::new();
        let mut seen_trade_ids: HashSet<u64> = HashSet::new();
        let mut seen_quotes: HashSet<(i64, Decimal, Decimal)> = HashSet::new();

        for path in &segments {
            let read = read_segment(path)?;
            report.events_read += read.events.len();
            report.discarded_bytes += read.discarded_bytes;
            report.malformed_lines += read.malformed_lines;

            for event in read.events {
                match event.payload {
                    EventPayload::Trade { trade_id, .. } => {
                        if seen_trade_ids.insert(trade_id) {
                            trades.push(event);
                        } else {
                            report.trades_deduped += 1;
                        }
                    }
                    EventPayload::Quote { bid, ask } => {
                        if seen_quotes.insert((event.ts_event.timestamp_millis(), bid, ask)) {
                            quotes.push(event);
                        } else {
                            report.quotes_deduped += 1;
                        }
                    }
                }
            }
        }

        if report.discarded_bytes > 0 {
            tracing::warn!(
                symbol,
                %date,
                discarded_bytes = report.discarded_bytes,
                "Aggregating over a truncated segment prefix"
            );
        }

        // Stable sort: ties keep read order, which keeps reruns reproducible
        trades.sort_by_key(|e| (e.ts_event, e.ts_recv));
        quotes.sort_by_key(|e| (e.ts_event, e.ts_recv));

        // Stragglers carrying a ts_event from an adjacent day land in this
        // day's segments but belong to another partition; clamp the
        // covered range to the requested date's windows.
        let day_start_ms = date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis();
        let day_end_ms = day_start_ms + 86_400_000;

        let bars = build_bars(
            symbol,
            self.window_ms,
            &trades,
            &quotes,
            Some((day_start_ms, day_end_ms)),
        )?;
        report.bar_count = bars.len();
        report.gap_count = bars.iter().filter(|b| b.is_gap()).count();

        if bars.is_empty() {
            tracing::warn!(symbol, %date, "No events produced any bars");
            return Ok(report);
        }

        let dir = partition_dir(&self.bars_root, symbol, date);
        std::fs::create_dir_all(&dir)?;
        let final_path = dir.join("part-00000.parquet");
        let tmp_path = dir.join("part-00000.parquet.tmp");
        write_bars(&tmp_path, &bars)?;
        if cancel.load(Ordering::Relaxed) {
            let _ = std::fs::remove_file(&tmp_path);
            anyhow::bail!("aggregation of {} {} cancelled before commit", symbol, date);
        }
        std::fs::rename(&tmp_path, &final_path)?;

        tracing::info!(
            symbol,
            %date,
            bars = report.bar_count,
            gaps = report.gap_count,
            deduped = report.trades_deduped,
            path = %final_path.display(),
            "Aggregation complete"
        );
        report.partition_file = Some(final_path);
        Ok(report)
    }
}

fn window_floor(ts_ms: i64, window_ms: i64) -> i64 {
    ts_ms.div_euclid(window_ms) * window_ms
}

/// Build one bar per window over the covered range.
///
/// `trades` and `quotes` must be pre-deduplicated and sorted ascending by
/// (ts_event, ts_recv). The quote cursor moves forward only: a window's
/// bid/ask is the last quote with ts_event before the window closed, and
/// is carried across trade-less windows, never backward in time.
///
/// `clamp` (half-open, epoch millis) bounds the covered range. Trades
/// outside it are dropped; quotes before it still seed the carried
/// bid/ask.
pub(crate) fn build_bars(
    symbol: &str,
    window_ms: i64,
    trades: &[Event],
    quotes: &[Event],
    clamp: Option<(i64, i64)>,
) -> anyhow::Result<Vec<Bar>> {
    let bounds = |events: &[Event]| -> Option<(i64, i64)> {
        Some((
            events.first()?.ts_event.timestamp_millis(),
            events.last()?.ts_event.timestamp_millis(),
        ))
    };
    let (first_ms, last_ms) = match (bounds(trades), bounds(quotes)) {
        (Some((tf, tl)), Some((qf, ql))) => (tf.min(qf), tl.max(ql)),
        (Some(t), None) => t,
        (None, Some(q)) => q,
        (None, None) => return Ok(Vec::new()),
    };

    let mut first_window = window_floor(first_ms, window_ms);
    let mut last_window = window_floor(last_ms, window_ms);
    if let Some((lo, hi)) = clamp {
        first_window = first_window.max(window_floor(lo, window_ms));
        last_window = last_window.min(window_floor(hi - 1, window_ms));
    }
    if first_window > last_window {
        return Ok(Vec::new());
    }

    let mut bars = Vec::with_capacity(((last_window - first_window) / window_ms + 1) as usize);
    let mut ti = 0usize;
    let mut qi = 0usize;

    // Trades before the range would otherwise be absorbed into its first
    // window; skip them outright
    while ti < trades.len() && trades[ti].ts_event.timestamp_millis() < first_window {
        ti += 1;
    }
    let mut last_quote: Option<(Decimal, Decimal)> = None;

    let mut window = first_window;
    while window <= last_window {
        let window_end = window + window_ms;

        let mut open = None;
        let mut high: Option<Decimal> = None;
        let mut low: Option<Decimal> = None;
        let mut close = None;
        let mut volume_base = Decimal::ZERO;
        let mut volume_quote = Decimal::ZERO;
        let mut trade_count = 0u64;

        while ti < trades.len() && trades[ti].ts_event.timestamp_millis() < window_end {
            if let EventPayload::Trade { price, qty, .. } = trades[ti].payload {
                if open.is_none() {
                    open = Some(price);
                }
                close = Some(price);
                high = Some(high.map_or(price, |h: Decimal| h.max(price)));
                low = Some(low.map_or(price, |l: Decimal| l.min(price)));
                volume_base += qty;
                volume_quote += price * qty;
                trade_count += 1;
            }
            ti += 1;
        }

        while qi < quotes.len() && quotes[qi].ts_event.timestamp_millis() < window_end {
            if let EventPayload::Quote { bid, ask } = quotes[qi].payload {
                last_quote = Some((bid, ask));
            }
            qi += 1;
        }

        let vwap = if trade_count == 0 {
            None
        } else if volume_base > Decimal::ZERO {
            Some(volume_quote / volume_base)
        } else {
            close
        };
        let (bid, ask) = match last_quote {
            Some((b, a)) => (Some(b), Some(a)),
            None => (None, None),
        };
        let spread = match (bid, ask) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        };

        bars.push(Bar {
            symbol: symbol.to_string(),
            window_start: DateTime::from_timestamp_millis(window)
                .ok_or_else(|| anyhow::anyhow!("window start out of range: {}", window))?,
            open,
            high,
            low,
            close,
            volume_base,
            volume_quote,
            trade_count,
            vwap,
            bid,
            ask,
            spread,
        });
        window += window_ms;
    }

    Ok(bars)
}
