//! Status command implementation
//!
//! Read-only scan of the storage tree for one date: segments, bar
//! partitions, archive and sidecar state per symbol.

use clap::Args;
use std::fs;

use crate::archive::ArchiveMeta;
use crate::bars::parquet::{archive_path, failure_report_path, list_partition_files, partition_dir, sidecar_path};
use crate::config::{resolve_date, Config};
use crate::segment::{day_dir, list_closed_segments};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// UTC date to inspect (YYYY-MM-DD, defaults to today)
    #[arg(short, long)]
    pub date: Option<String>,
}

impl StatusArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let date = resolve_date(self.date.as_deref())?;
        let raw_root = config.storage.raw_root();
        let bars_root = config.storage.bars_root();

        println!("tickvault status for {}", date);
        println!("  base_dir: {}", config.storage.base_dir.display());

        for symbol in &config.feed.symbols {
            let closed = list_closed_segments(&raw_root, symbol, date)?;
            let open = count_open_segments(&day_dir(&raw_root, symbol, date))?;
            let partitions = list_partition_files(&partition_dir(&bars_root, symbol, date))?;

            println!("  {}:", symbol);
            println!("    segments: {} closed, {} open", closed.len(), open);
            println!("    bar partitions: {}", partitions.len());

            let sidecar = sidecar_path(&bars_root, symbol, date);
            if sidecar.is_file() {
                let meta: ArchiveMeta = serde_json::from_str(&fs::read_to_string(&sidecar)?)?;
                let archived = archive_path(&bars_root, symbol, date).is_file();
                println!(
                    "    archive: {} rows ({} gaps), sha256 {}{}",
                    meta.row_count,
                    meta.gap_count,
                    &meta.sha256[..12.min(meta.sha256.len())],
                    if archived { "" } else { " [MISSING PARQUET]" }
                );
            } else {
                println!("    archive: none");
            }

            if failure_report_path(&bars_root, symbol, date).is_file() {
                println!("    integrity: FAILURE REPORT PRESENT");
            }
        }

        Ok(())
    }
}

fn count_open_segments(dir: &std::path::Path) -> anyhow::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut open = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if name.to_str().is_some_and(|n| n.ends_with(".open")) {
            open += 1;
        }
    }
    Ok(open)
}
