//! Daily compaction
//!
//! Merges a symbol/day's bar partitions into a single archive, validates
//! window continuity, and records a SHA-256 content hash in a sidecar.
//! A committed archive is never overwritten with different content; that
//! is an integrity failure, reported loudly and left for an operator.

use crate::bars::parquet::{
    archive_path, failure_report_path, list_partition_files, partition_dir, read_bars,
    sidecar_path, write_bars,
};
use crate::bars::{canonical_hash, Bar};
use crate::config::{AggregatorConfig, StorageConfig};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Integrity failures are fatal to the affected job only and never touch
/// previously committed output.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("duplicate window_start {window} for {symbol} {date}")]
    DuplicateWindow {
        symbol: String,
        date: NaiveDate,
        window: DateTime<Utc>,
    },

    #[error("out-of-order windows for {symbol} {date}: {prev} then {next}")]
    OutOfOrder {
        symbol: String,
        date: NaiveDate,
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("window continuity broken for {symbol} {date}: hole between {prev} and {next}")]
    BrokenContinuity {
        symbol: String,
        date: NaiveDate,
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error(
        "committed archive for {symbol} {date} would change: committed {committed}, recomputed {recomputed}"
    )]
    CommittedArchiveChanged {
        symbol: String,
        date: NaiveDate,
        committed: String,
        recomputed: String,
    },
}

/// Metadata sidecar written next to each daily archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub date: NaiveDate,
    pub symbol: String,
    pub row_count: u64,
    pub gap_count: u64,
    pub sha256: String,
    pub source_partition_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Structured failure report for the external supervisor
#[derive(Debug, Serialize)]
struct FailureReport<'a> {
    date: NaiveDate,
    symbol: &'a str,
    reason: String,
    created_at: DateTime<Utc>,
}

/// Outcome of verifying one symbol/day archive against its sidecar
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub symbol: String,
    pub date: NaiveDate,
    pub passed: bool,
    pub expected_sha256: String,
    pub actual_sha256: Option<String>,
    pub row_count: u64,
    pub reason: Option<String>,
}

/// Batch compaction job, invoked per symbol/date
pub struct Compactor {
    bars_root: PathBuf,
    window_ms: i64,
}

impl Compactor {
    pub fn new(storage: &StorageConfig, aggregator: &AggregatorConfig) -> Self {
        Self {
            bars_root: storage.bars_root(),
            window_ms: (aggregator.window_secs.max(1) * 1000) as i64,
        }
    }

    /// Merge one symbol/day's partitions into the daily archive.
    ///
    /// Idempotent when the recomputed content matches the committed
    /// sidecar hash; any difference refuses to overwrite and writes a
    /// failure report instead. Commits are staged to a temporary file and
    /// renamed, so a cancelled job never leaves a half-written archive.
    pub fn compact(&self, symbol: &str, date: NaiveDate) -> anyhow::Result<ArchiveMeta> {
        self.compact_with_cancel(symbol, date, &AtomicBool::new(false))
    }

    /// Like [`compact`](Self::compact), but skips the commit once `cancel`
    /// is set. The deadline supervisor sets the flag when a job overruns:
    /// the blocking thread cannot be killed, but it then finishes without
    /// publishing anything.
    pub fn compact_with_cancel(
        &self,
        symbol: &str,
        date: NaiveDate,
        cancel: &AtomicBool,
    ) -> anyhow::Result<ArchiveMeta> {
        let dir = partition_dir(&self.bars_root, symbol, date);
        let files = list_partition_files(&dir)?;
        if files.is_empty() {
            anyhow::bail!("no bar partitions for {} on {}", symbol, date);
        }

        let mut bars: Vec<Bar> = Vec::new();
        for file in &files {
            bars.extend(read_bars(file)?);
        }

        if let Err(e) = self.validate_continuity(symbol, date, &bars) {
            self.write_failure_report(symbol, date, &e)?;
            return Err(e.into());
        }

        let sha256 = canonical_hash(&bars);
        let row_count = bars.len() as u64;
        let gap_count = bars.iter().filter(|b| b.is_gap()).count() as u64;

        let sidecar = sidecar_path(&self.bars_root, symbol, date);
        if sidecar.is_file() {
            let committed: ArchiveMeta =
                serde_json::from_str(&std::fs::read_to_string(&sidecar)?)?;
            if committed.sha256 == sha256 {
                tracing::info!(symbol, %date, %sha256, "Archive already committed and unchanged");
                return Ok(committed);
            }
            let e = IntegrityError::CommittedArchiveChanged {
                symbol: symbol.to_string(),
                date,
                committed: committed.sha256,
                recomputed: sha256,
            };
            self.write_failure_report(symbol, date, &e)?;
            return Err(e.into());
        }

        let meta = ArchiveMeta {
            date,
            symbol: symbol.to_string(),
            row_count,
            gap_count,
            sha256,
            source_partition_count: files.len() as u32,
            created_at: Utc::now(),
        };

        if cancel.load(Ordering::Relaxed) {
            anyhow::bail!("compaction of {} {} cancelled before commit", symbol, date);
        }

        let archive = archive_path(&self.bars_root, symbol, date);
        stage_and_rename(&archive, |tmp| write_bars(tmp, &bars))?;
        stage_and_rename(&sidecar, |tmp| {
            Ok(std::fs::write(tmp, serde_json::to_string_pretty(&meta)?)?)
        })?;

        tracing::info!(
            symbol,
            %date,
            rows = meta.row_count,
            gaps = meta.gap_count,
            sha256 = %meta.sha256,
            partitions = meta.source_partition_count,
            "Wrote daily archive"
        );
        Ok(meta)
    }

    /// Check strict window order and fixed-width continuity. Gap bars are
    /// expected rows; a missing row means partition data was lost.
    fn validate_continuity(
        &self,
        symbol: &str,
        date: NaiveDate,
        bars: &[Bar],
    ) -> Result<(), IntegrityError> {
        for pair in bars.windows(2) {
            let (prev, next) = (pair[0].window_start, pair[1].window_start);
            let step = (next - prev).num_milliseconds();
            if step == 0 {
                return Err(IntegrityError::DuplicateWindow {
                    symbol: symbol.to_string(),
                    date,
                    window: next,
                });
            }
            if step < 0 {
                return Err(IntegrityError::OutOfOrder {
                    symbol: symbol.to_string(),
                    date,
                    prev,
                    next,
                });
            }
            if step != self.window_ms {
                return Err(IntegrityError::BrokenContinuity {
                    symbol: symbol.to_string(),
                    date,
                    prev,
                    next,
                });
            }
        }
        Ok(())
    }

    /// Recompute the archive's content hash and compare to the sidecar.
    ///
    /// A missing or unreadable sidecar verifies as failed rather than
    /// erroring, so one unarchived symbol never aborts a multi-symbol run.
    pub fn verify_symbol(&self, symbol: &str, date: NaiveDate) -> anyhow::Result<VerifyReport> {
        let unverifiable = |reason: String| VerifyReport {
            symbol: symbol.to_string(),
            date,
            passed: false,
            expected_sha256: String::new(),
            actual_sha256: None,
            row_count: 0,
            reason: Some(reason),
        };

        let sidecar = sidecar_path(&self.bars_root, symbol, date);
        let meta: ArchiveMeta = match std::fs::read_to_string(&sidecar) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(meta) => meta,
                Err(e) => return Ok(unverifiable(format!("sidecar corrupt: {}", e))),
            },
            Err(e) => return Ok(unverifiable(format!("sidecar unreadable: {}", e))),
        };

        let archive = archive_path(&self.bars_root, symbol, date);
        let bars = match read_bars(&archive) {
            Ok(bars) => bars,
            Err(e) => {
                return Ok(VerifyReport {
                    symbol: symbol.to_string(),
                    date,
                    passed: false,
                    expected_sha256: meta.sha256,
                    actual_sha256: None,
                    row_count: meta.row_count,
                    reason: Some(format!("archive unreadable: {}", e)),
                });
            }
        };

        let actual = canonical_hash(&bars);
        let mut reason = None;
        if actual != meta.sha256 {
            reason = Some("content hash mismatch".to_string());
        } else if bars.len() as u64 != meta.row_count {
            reason = Some(format!(
                "row count mismatch: sidecar {}, archive {}",
                meta.row_count,
                bars.len()
            ));
        }

        Ok(VerifyReport {
            symbol: symbol.to_string(),
            date,
            passed: reason.is_none(),
            expected_sha256: meta.sha256,
            actual_sha256: Some(actual),
            row_count: bars.len() as u64,
            reason,
        })
    }

    /// Symbols that have a committed archive sidecar for the given date
    pub fn symbols_with_archive(&self, date: NaiveDate) -> anyhow::Result<Vec<String>> {
        if !self.bars_root.is_dir() {
            return Ok(Vec::new());
        }
        let mut symbols = Vec::new();
        for entry in std::fs::read_dir(&self.bars_root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(symbol) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if sidecar_path(&self.bars_root, &symbol, date).is_file() {
                symbols.push(symbol);
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    fn write_failure_report(
        &self,
        symbol: &str,
        date: NaiveDate,
        error: &IntegrityError,
    ) -> anyhow::Result<()> {
        let report = FailureReport {
            date,
            symbol,
            reason: error.to_string(),
            created_at: Utc::now(),
        };
        let path = failure_report_path(&self.bars_root, symbol, date);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        tracing::error!(symbol, %date, reason = %report.reason, path = %path.display(), "Integrity failure");
        Ok(())
    }
}

/// Write through a `.tmp` sibling and atomically rename into place
fn stage_and_rename(
    path: &Path,
    write: impl FnOnce(&Path) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid staging path: {}", path.display()))?;
    let tmp = path.with_file_name(format!("{}.tmp", file_name));
    write(&tmp)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
