//! Compact command implementation

use clap::Args;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::archive::Compactor;
use crate::config::{resolve_date, Config};

#[derive(Args, Debug)]
pub struct CompactArgs {
    /// UTC date to compact (YYYY-MM-DD, defaults to today)
    #[arg(short, long)]
    pub date: Option<String>,

    /// Override the configured symbol list (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
}

impl CompactArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let date = resolve_date(self.date.as_deref())?;
        let symbols = match &self.symbols {
            Some(s) => s.iter().map(|s| s.to_uppercase()).collect(),
            None => config.feed.symbols.clone(),
        };
        let timeout = Duration::from_secs(config.compactor.job_timeout_secs);

        let mut failed = 0usize;
        for symbol in &symbols {
            let compactor = Compactor::new(&config.storage, &config.aggregator);
            let job_symbol = symbol.clone();
            // The blocking thread outlives a timeout; the flag keeps an
            // overrun job from committing after it was reported failed
            let cancel = Arc::new(AtomicBool::new(false));
            let job_cancel = cancel.clone();
            let job = tokio::task::spawn_blocking(move || {
                compactor.compact_with_cancel(&job_symbol, date, &job_cancel)
            });

            let result = tokio::select! {
                res = tokio::time::timeout(timeout, job) => res,
                _ = tokio::signal::ctrl_c() => {
                    cancel.store(true, Ordering::Relaxed);
                    anyhow::bail!("Interrupted during compaction of {}", symbol);
                }
            };

            match result {
                Ok(Ok(Ok(meta))) => {
                    println!(
                        "{} {}: {} rows ({} gaps) from {} partitions, sha256 {}",
                        symbol,
                        date,
                        meta.row_count,
                        meta.gap_count,
                        meta.source_partition_count,
                        meta.sha256
                    );
                }
                Ok(Ok(Err(e))) => {
                    tracing::error!(symbol = %symbol, %date, error = %e, "Compaction failed");
                    failed += 1;
                }
                Ok(Err(e)) => {
                    tracing::error!(symbol = %symbol, %date, error = %e, "Compaction task panicked");
                    failed += 1;
                }
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    tracing::error!(symbol = %symbol, %date, timeout_secs = timeout.as_secs(), "Compaction timed out");
                    failed += 1;
                }
            }
        }

        anyhow::ensure!(failed == 0, "{} of {} compaction jobs failed", failed, symbols.len());
        Ok(())
    }
}
