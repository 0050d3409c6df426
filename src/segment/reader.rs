//! Segment reader
//!
//! Tolerates a truncated trailing record (process killed mid-append):
//! parsing stops at the last fully-formed line and the discarded byte
//! count is reported, never an error.

use crate::feed::Event;
use std::path::Path;

/// Result of reading one segment file
#[derive(Debug)]
pub struct SegmentRead {
    pub events: Vec<Event>,
    /// Bytes of a truncated trailing record that were discarded
    pub discarded_bytes: u64,
    /// Fully-delimited lines that failed to parse (should not happen)
    pub malformed_lines: u64,
}

/// Read all events from a closed segment, in file order
pub fn read_segment(path: &Path) -> anyhow::Result<SegmentRead> {
    let content = std::fs::read_to_string(path)?;

    let mut events = Vec::new();
    let mut discarded_bytes = 0u64;
    let mut malformed_lines = 0u64;

    let mut rest = content.as_str();
    while !rest.is_empty() {
        let (line, complete, consumed) = match rest.find('\n') {
            Some(i) => (&rest[..i], true, i + 1),
            None => (rest, false, rest.len()),
        };

        if !line.trim().is_empty() {
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) if !complete => {
                    // Trailing partial record from an abrupt termination
                    discarded_bytes = line.len() as u64;
                    tracing::warn!(
                        path = %path.display(),
                        discarded_bytes,
                        error = %e,
                        "Discarded truncated trailing record"
                    );
                }
                Err(e) => {
                    malformed_lines += 1;
                    tracing::warn!(path = %path.display(), error = %e, "Skipped malformed record");
                }
            }
        }
        rest = &rest[consumed..];
    }

    Ok(SegmentRead {
        events,
        discarded_bytes,
        malformed_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{EventPayload, Side};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn trade_line(ms: i64, trade_id: u64) -> String {
        let event = Event {
            symbol: "BTCUSDT".to_string(),
            ts_event: Utc.timestamp_millis_opt(ms).unwrap(),
            ts_recv: Utc.timestamp_millis_opt(ms + 5).unwrap(),
            payload: EventPayload::Trade {
                price: dec!(100.5),
                qty: dec!(0.25),
                side: Side::Buy,
                trade_id,
            },
        };
        serde_json::to_string(&event).unwrap()
    }

    #[test]
    fn test_read_clean_segment() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("part_001.jsonl");
        let content = format!("{}\n{}\n", trade_line(1000, 1), trade_line(2000, 2));
        std::fs::write(&path, content).unwrap();

        let read = read_segment(&path).unwrap();
        assert_eq!(read.events.len(), 2);
        assert_eq!(read.discarded_bytes, 0);
        assert_eq!(read.malformed_lines, 0);
        assert_eq!(read.events[0].ts_event.timestamp_millis(), 1000);
    }

    #[test]
    fn test_truncated_trailing_record_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("part_001.jsonl");
        let full = trade_line(1000, 1);
        let partial = &trade_line(2000, 2)[..20];
        std::fs::write(&path, format!("{}\n{}", full, partial)).unwrap();

        let read = read_segment(&path).unwrap();
        assert_eq!(read.events.len(), 1);
        assert_eq!(read.discarded_bytes, 20);
        assert_eq!(read.malformed_lines, 0);
    }

    #[test]
    fn test_complete_final_line_without_newline_parses() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("part_001.jsonl");
        std::fs::write(&path, trade_line(1000, 1)).unwrap();

        let read = read_segment(&path).unwrap();
        assert_eq!(read.events.len(), 1);
        assert_eq!(read.discarded_bytes, 0);
    }

    #[test]
    fn test_malformed_middle_line_counted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("part_001.jsonl");
        let content = format!("{}\ngarbage\n{}\n", trade_line(1000, 1), trade_line(2000, 2));
        std::fs::write(&path, content).unwrap();

        let read = read_segment(&path).unwrap();
        assert_eq!(read.events.len(), 2);
        assert_eq!(read.malformed_lines, 1);
    }

    #[test]
    fn test_empty_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("part_001.jsonl");
        std::fs::write(&path, b"").unwrap();

        let read = read_segment(&path).unwrap();
        assert!(read.events.is_empty());
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(read_segment(Path::new("/nonexistent/part_001.jsonl")).is_err());
    }
}
