//! Rotating segment writer
//!
//! Sole owner of the open segment for its symbol. Appends JSONL records,
//! seals on an aligned time boundary or a byte ceiling (whichever first),
//! and on graceful shutdown. Sealing is flush + fsync + rename, so a
//! `part_NNN.jsonl` file is durable and immutable from the moment it is
//! visible under that name.

use super::{day_dir, part_index};
use crate::feed::Event;
use chrono::{DateTime, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Writer health snapshot for the status surface
#[derive(Debug, Default, Clone)]
pub struct WriterStats {
    pub events_written: u64,
    pub segments_sealed: u64,
    pub last_rotation: Option<DateTime<Utc>>,
    pub open_segment: Option<PathBuf>,
}

struct OpenSegment {
    open_path: PathBuf,
    final_path: PathBuf,
    file: BufWriter<File>,
    bytes: u64,
    date: NaiveDate,
    part: u32,
    /// Aligned epoch-millis boundary at which the segment rotates
    next_rotation_ms: i64,
}

/// Rotating JSONL writer for one symbol
pub struct SegmentWriter {
    raw_root: PathBuf,
    symbol: String,
    interval_ms: i64,
    max_bytes: u64,
    current: Option<OpenSegment>,
    events_written: u64,
    segments_sealed: u64,
    last_rotation: Option<DateTime<Utc>>,
}

impl SegmentWriter {
    /// Create a writer, sealing any `.open` segments a previous process
    /// left behind after a crash.
    pub fn new(
        raw_root: impl Into<PathBuf>,
        symbol: impl Into<String>,
        rotation_interval_secs: u64,
        max_segment_bytes: u64,
    ) -> anyhow::Result<Self> {
        let writer = Self {
            raw_root: raw_root.into(),
            symbol: symbol.into(),
            interval_ms: (rotation_interval_secs.max(1) * 1000) as i64,
            max_bytes: max_segment_bytes.max(1),
            current: None,
            events_written: 0,
            segments_sealed: 0,
            last_rotation: None,
        };
        let recovered = writer.recover_stale_segments()?;
        if recovered > 0 {
            tracing::warn!(
                symbol = %writer.symbol,
                recovered,
                "Sealed stale open segments from a previous run"
            );
        }
        Ok(writer)
    }

    /// Seal leftover `part_*.jsonl.open` files under every date directory
    /// for this symbol. Their trailing record may be partial; the reader
    /// discards it.
    fn recover_stale_segments(&self) -> anyhow::Result<usize> {
        let symbol_dir = self.raw_root.join(&self.symbol);
        if !symbol_dir.is_dir() {
            return Ok(0);
        }
        let mut recovered = 0;
        for day in fs::read_dir(&symbol_dir)? {
            let day = day?.path();
            if !day.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&day)? {
                let path = entry?.path();
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n,
                    None => continue,
                };
                if let Some(sealed) = name.strip_suffix(".open") {
                    fs::rename(&path, day.join(sealed))?;
                    recovered += 1;
                }
            }
        }
        Ok(recovered)
    }

    /// Append one event, rotating first if a boundary has been crossed.
    /// Write failures (e.g. disk full) are fatal to the caller.
    pub fn write(&mut self, event: &Event, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.rotate_if_needed(now)?;

        let cur = self
            .current
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no open segment after rotation"))?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        cur.file.write_all(line.as_bytes())?;
        cur.bytes += line.len() as u64;
        self.events_written += 1;

        // Size ceiling seals immediately; the next write opens a new part
        if self.current.as_ref().map(|c| c.bytes >= self.max_bytes) == Some(true) {
            self.seal_current(now)?;
        }
        Ok(())
    }

    /// Seal the open segment (if any) and open the next one
    pub fn rotate(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        self.seal_current(now)?;
        self.open_new(now)
    }

    /// Seal the open segment on graceful shutdown
    pub fn close(&mut self) -> anyhow::Result<()> {
        self.seal_current(Utc::now())
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            events_written: self.events_written,
            segments_sealed: self.segments_sealed,
            last_rotation: self.last_rotation,
            open_segment: self.current.as_ref().map(|c| c.open_path.clone()),
        }
    }

    fn rotate_if_needed(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let needs = match &self.current {
            None => true,
            Some(cur) => {
                now.timestamp_millis() >= cur.next_rotation_ms || now.date_naive() != cur.date
            }
        };
        if needs {
            if self.current.is_some() {
                self.seal_current(now)?;
            }
            self.open_new(now)?;
        }
        Ok(())
    }

    fn open_new(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let date = now.date_naive();
        let dir = day_dir(&self.raw_root, &self.symbol, date);
        fs::create_dir_all(&dir)?;

        let part = match &self.current {
            Some(cur) if cur.date == date => cur.part + 1,
            _ => next_part_index(&dir)?,
        };

        let final_path = dir.join(format!("part_{:03}.jsonl", part));
        let open_path = dir.join(format!("part_{:03}.jsonl.open", part));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&open_path)?;

        let ms = now.timestamp_millis();
        let next_rotation_ms = (ms.div_euclid(self.interval_ms) + 1) * self.interval_ms;

        tracing::info!(
            symbol = %self.symbol,
            path = %open_path.display(),
            next_rotation_ms,
            "Opened segment"
        );

        self.current = Some(OpenSegment {
            open_path,
            final_path,
            file: BufWriter::new(file),
            bytes: 0,
            date,
            part,
            next_rotation_ms,
        });
        Ok(())
    }

    /// Flush, fsync, and rename the open segment to its final name
    fn seal_current(&mut self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let Some(mut cur) = self.current.take() else {
            return Ok(());
        };
        cur.file.flush()?;
        cur.file.get_ref().sync_all()?;
        drop(cur.file);
        fs::rename(&cur.open_path, &cur.final_path)?;

        self.segments_sealed += 1;
        self.last_rotation = Some(now);
        crate::telemetry::metrics::incr_segment_sealed(&self.symbol);
        tracing::info!(
            symbol = %self.symbol,
            path = %cur.final_path.display(),
            bytes = cur.bytes,
            "Sealed segment"
        );
        Ok(())
    }
}

/// Next free part number in a day directory, counting sealed and open files
fn next_part_index(dir: &Path) -> anyhow::Result<u32> {
    let mut max_part = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let stem = name.strip_suffix(".open").unwrap_or(name);
        if let Some(idx) = part_index(stem) {
            max_part = max_part.max(idx);
        }
    }
    Ok(max_part + 1)
}

/// Writer task: drains one symbol's bounded channel until it closes.
///
/// A full channel blocks the producer (tokio send backpressure); durability
/// wins over connector liveness. Returns an error on unrecoverable write
/// failure, after which no further events are accepted.
pub async fn run_writer(
    mut rx: mpsc::Receiver<Event>,
    mut writer: SegmentWriter,
    stats: Arc<RwLock<WriterStats>>,
) -> anyhow::Result<()> {
    while let Some(event) = rx.recv().await {
        if let Err(e) = writer.write(&event, Utc::now()) {
            tracing::error!(error = %e, "Segment write failed; writer stopping");
            return Err(e);
        }
        *stats.write().await = writer.stats();
    }
    writer.close()?;
    *stats.write().await = writer.stats();
    tracing::info!(events = writer.stats().events_written, "Segment writer shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{EventPayload, Side};
    use crate::segment::list_closed_segments;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn event_at(ms: i64) -> Event {
        Event {
            symbol: "BTCUSDT".to_string(),
            ts_event: Utc.timestamp_millis_opt(ms).unwrap(),
            ts_recv: Utc.timestamp_millis_opt(ms + 5).unwrap(),
            payload: EventPayload::Trade {
                price: dec!(100.0),
                qty: dec!(1),
                side: Side::Buy,
                trade_id: ms as u64,
            },
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    // 2025-01-04 00:00:00 UTC
    const T0: i64 = 1735948800000;

    #[test]
    fn test_time_rotation_seals_previous_part() {
        let tmp = TempDir::new().unwrap();
        let mut w = SegmentWriter::new(tmp.path(), "BTCUSDT", 60, u64::MAX).unwrap();

        w.write(&event_at(T0 + 1000), at(T0 + 1000)).unwrap();
        w.write(&event_at(T0 + 2000), at(T0 + 2000)).unwrap();
        // Crossing the aligned 60s boundary rotates
        w.write(&event_at(T0 + 61_000), at(T0 + 61_000)).unwrap();

        let date = at(T0).date_naive();
        let closed = list_closed_segments(tmp.path(), "BTCUSDT", date).unwrap();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].ends_with("part_001.jsonl"));
        assert!(w.stats().open_segment.unwrap().ends_with("part_002.jsonl.open"));

        w.close().unwrap();
        let closed = list_closed_segments(tmp.path(), "BTCUSDT", date).unwrap();
        assert_eq!(closed.len(), 2);
    }

    #[test]
    fn test_size_rotation() {
        let tmp = TempDir::new().unwrap();
        // Tiny byte ceiling: every write seals its segment
        let mut w = SegmentWriter::new(tmp.path(), "BTCUSDT", 3600, 10).unwrap();

        w.write(&event_at(T0), at(T0)).unwrap();
        w.write(&event_at(T0 + 1), at(T0 + 1)).unwrap();

        let closed = list_closed_segments(tmp.path(), "BTCUSDT", at(T0).date_naive()).unwrap();
        assert_eq!(closed.len(), 2);
        assert!(w.stats().open_segment.is_none());
    }

    #[test]
    fn test_day_rollover_resets_parts() {
        let tmp = TempDir::new().unwrap();
        let mut w = SegmentWriter::new(tmp.path(), "BTCUSDT", 3600, u64::MAX).unwrap();

        w.write(&event_at(T0 + 1000), at(T0 + 1000)).unwrap();
        let next_day = T0 + 24 * 3600 * 1000 + 1000;
        w.write(&event_at(next_day), at(next_day)).unwrap();
        w.close().unwrap();

        let d1 = list_closed_segments(tmp.path(), "BTCUSDT", at(T0).date_naive()).unwrap();
        let d2 = list_closed_segments(tmp.path(), "BTCUSDT", at(next_day).date_naive()).unwrap();
        assert_eq!(d1.len(), 1);
        assert_eq!(d2.len(), 1);
        assert!(d2[0].ends_with("part_001.jsonl"));
    }

    #[test]
    fn test_part_numbering_resumes_after_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let mut w = SegmentWriter::new(tmp.path(), "BTCUSDT", 3600, u64::MAX).unwrap();
            w.write(&event_at(T0), at(T0)).unwrap();
            w.close().unwrap();
        }
        {
            let mut w = SegmentWriter::new(tmp.path(), "BTCUSDT", 3600, u64::MAX).unwrap();
            w.write(&event_at(T0 + 1000), at(T0 + 1000)).unwrap();
            w.close().unwrap();
        }

        let closed = list_closed_segments(tmp.path(), "BTCUSDT", at(T0).date_naive()).unwrap();
        assert_eq!(closed.len(), 2);
        assert!(closed[1].ends_with("part_002.jsonl"));
    }

    #[test]
    fn test_crash_recovery_seals_stale_open() {
        let tmp = TempDir::new().unwrap();
        let date = at(T0).date_naive();
        let dir = day_dir(tmp.path(), "BTCUSDT", date);
        fs::create_dir_all(&dir).unwrap();
        // Simulate a crash mid-write: an .open file with a truncated tail
        fs::write(dir.join("part_001.jsonl.open"), b"{\"symbol\":\"BTC").unwrap();

        let _w = SegmentWriter::new(tmp.path(), "BTCUSDT", 60, u64::MAX).unwrap();

        let closed = list_closed_segments(tmp.path(), "BTCUSDT", date).unwrap();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].ends_with("part_001.jsonl"));
    }

    #[tokio::test]
    async fn test_run_writer_drains_and_seals() {
        let tmp = TempDir::new().unwrap();
        let writer = SegmentWriter::new(tmp.path(), "BTCUSDT", 3600, u64::MAX).unwrap();
        let stats = Arc::new(RwLock::new(WriterStats::default()));

        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_writer(rx, writer, stats.clone()));

        tx.send(event_at(T0)).await.unwrap();
        tx.send(event_at(T0 + 1)).await.unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let s = stats.read().await.clone();
        assert_eq!(s.events_written, 2);
        assert_eq!(s.segments_sealed, 1);

        let closed =
            list_closed_segments(tmp.path(), "BTCUSDT", Utc::now().date_naive()).unwrap();
        assert_eq!(closed.len(), 1);
    }
}
