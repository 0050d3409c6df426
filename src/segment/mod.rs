//! Raw event segments
//!
//! An append-only JSONL file per symbol, bounded by a rotation policy.
//! The open segment carries an `.open` suffix and is renamed on seal, so
//! closed-ness is recoverable from the filesystem alone: batch jobs only
//! ever see `part_NNN.jsonl` files, which are immutable by construction.

mod reader;
mod writer;

pub use reader::{read_segment, SegmentRead};
pub use writer::{run_writer, SegmentWriter, WriterStats};

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Directory holding one symbol/day's segments: `{raw_root}/{SYMBOL}/{date}`
pub fn day_dir(raw_root: &Path, symbol: &str, date: NaiveDate) -> PathBuf {
    raw_root.join(symbol).join(date.format("%Y-%m-%d").to_string())
}

/// Parse the part index out of a segment file name (`part_007.jsonl` -> 7)
pub(crate) fn part_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("part_")?
        .strip_suffix(".jsonl")?
        .parse()
        .ok()
}

/// List a symbol/day's closed segments in part order.
///
/// The query surface used by the batch jobs; the currently-open segment
/// (`.jsonl.open`) never matches. A missing day directory is an empty list.
pub fn list_closed_segments(
    raw_root: &Path,
    symbol: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<PathBuf>> {
    let dir = day_dir(raw_root, symbol, date);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut parts: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(idx) = name.to_str().and_then(part_index) {
            parts.push((idx, entry.path()));
        }
    }
    parts.sort_by_key(|(idx, _)| *idx);
    Ok(parts.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_part_index() {
        assert_eq!(part_index("part_001.jsonl"), Some(1));
        assert_eq!(part_index("part_123.jsonl"), Some(123));
        assert_eq!(part_index("part_001.jsonl.open"), None);
        assert_eq!(part_index("other.jsonl"), None);
        assert_eq!(part_index("part_x.jsonl"), None);
    }

    #[test]
    fn test_list_closed_segments_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        let segs = list_closed_segments(tmp.path(), "BTCUSDT", date).unwrap();
        assert!(segs.is_empty());
    }

    #[test]
    fn test_list_closed_segments_skips_open_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        let dir = day_dir(tmp.path(), "BTCUSDT", date);
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["part_010.jsonl", "part_002.jsonl", "part_003.jsonl.open", "junk.txt"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }

        let segs = list_closed_segments(tmp.path(), "BTCUSDT", date).unwrap();
        let names: Vec<_> = segs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["part_002.jsonl", "part_010.jsonl"]);
    }
}
