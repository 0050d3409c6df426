//! Verify command implementation

use clap::Args;

use crate::archive::Compactor;
use crate::config::{resolve_date, Config};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// UTC date to verify (YYYY-MM-DD, defaults to today)
    #[arg(short, long)]
    pub date: Option<String>,

    /// Restrict to specific symbols (defaults to every archived symbol)
    #[arg(short, long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
}

impl VerifyArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let date = resolve_date(self.date.as_deref())?;
        let compactor = Compactor::new(&config.storage, &config.aggregator);

        let symbols = match &self.symbols {
            Some(s) => s.iter().map(|s| s.to_uppercase()).collect(),
            None => compactor.symbols_with_archive(date)?,
        };
        anyhow::ensure!(!symbols.is_empty(), "No archives found for {}", date);

        let mut failed = 0usize;
        for symbol in &symbols {
            let report = compactor.verify_symbol(symbol, date)?;
            if report.passed {
                println!("{} {}: OK ({} rows, sha256 {})", symbol, date, report.row_count, report.expected_sha256);
            } else {
                failed += 1;
                println!(
                    "{} {}: FAILED ({})",
                    symbol,
                    date,
                    report.reason.as_deref().unwrap_or("hash mismatch")
                );
                tracing::error!(
                    symbol = %symbol,
                    %date,
                    expected = %report.expected_sha256,
                    actual = report.actual_sha256.as_deref().unwrap_or("<unreadable>"),
                    "Archive verification failed"
                );
            }
        }

        anyhow::ensure!(failed == 0, "{} of {} archives failed verification", failed, symbols.len());
        Ok(())
    }
}
