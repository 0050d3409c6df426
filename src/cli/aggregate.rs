//! Aggregate command implementation

use clap::Args;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bars::Aggregator;
use crate::config::{resolve_date, Config};

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// UTC date to aggregate (YYYY-MM-DD, defaults to today)
    #[arg(short, long)]
    pub date: Option<String>,

    /// Override the configured symbol list (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
}

impl AggregateArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let date = resolve_date(self.date.as_deref())?;
        let symbols = match &self.symbols {
            Some(s) => s.iter().map(|s| s.to_uppercase()).collect(),
            None => config.feed.symbols.clone(),
        };
        let timeout = Duration::from_secs(config.aggregator.job_timeout_secs);

        let mut failed = 0usize;
        for symbol in &symbols {
            let aggregator = Aggregator::new(&config.storage, &config.aggregator);
            let job_symbol = symbol.clone();
            // The blocking thread outlives a timeout; the flag keeps an
            // overrun job from committing after it was reported failed
            let cancel = Arc::new(AtomicBool::new(false));
            let job_cancel = cancel.clone();
            let job = tokio::task::spawn_blocking(move || {
                aggregator.aggregate_with_cancel(&job_symbol, date, &job_cancel)
            });

            let result = tokio::select! {
                res = tokio::time::timeout(timeout, job) => res,
                _ = tokio::signal::ctrl_c() => {
                    cancel.store(true, Ordering::Relaxed);
                    anyhow::bail!("Interrupted during aggregation of {}", symbol);
                }
            };

            match result {
                Ok(Ok(Ok(report))) => {
                    let target = report
                        .partition_file
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "(nothing to write)".to_string());
                    println!(
                        "{} {}: {} bars ({} gaps) from {} events in {} segments -> {}",
                        symbol,
                        date,
                        report.bar_count,
                        report.gap_count,
                        report.events_read,
                        report.segments_read,
                        target
                    );
                }
                Ok(Ok(Err(e))) => {
                    tracing::error!(symbol = %symbol, %date, error = %e, "Aggregation failed");
                    failed += 1;
                }
                Ok(Err(e)) => {
                    tracing::error!(symbol = %symbol, %date, error = %e, "Aggregation task panicked");
                    failed += 1;
                }
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    tracing::error!(symbol = %symbol, %date, timeout_secs = timeout.as_secs(), "Aggregation timed out");
                    failed += 1;
                }
            }
        }

        anyhow::ensure!(failed == 0, "{} of {} aggregation jobs failed", failed, symbols.len());
        Ok(())
    }
}
