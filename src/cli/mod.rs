//! CLI interface for tickvault
//!
//! Provides subcommands for:
//! - `collect`: Stream the live feed into rotating JSONL segments
//! - `aggregate`: Build 1s bars from closed segments for a date
//! - `compact`: Merge bar partitions into a daily archive
//! - `verify`: Recompute archive hashes against their sidecars
//! - `status`: Show storage state for a date

mod aggregate;
mod collect;
mod compact;
mod status;
mod verify;

pub use aggregate::AggregateArgs;
pub use collect::CollectArgs;
pub use compact::CompactArgs;
pub use status::StatusArgs;
pub use verify::VerifyArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tickvault")]
#[command(about = "Market data capture, aggregation, and archival pipeline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream the live feed into rotating JSONL segments
    Collect(CollectArgs),
    /// Build 1s bars from closed segments for a date
    Aggregate(AggregateArgs),
    /// Merge bar partitions into a daily archive
    Compact(CompactArgs),
    /// Recompute archive hashes against their sidecars
    Verify(VerifyArgs),
    /// Show storage state for a date
    Status(StatusArgs),
}
