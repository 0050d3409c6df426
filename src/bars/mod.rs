//! Fixed-window bar aggregation
//!
//! Turns a day's closed segments into a deterministic sequence of bars,
//! one per window in the covered range, gaps included, and writes them as
//! a partitioned Parquet dataset.

mod aggregator;
pub mod parquet;
mod types;

pub use aggregator::{AggregateReport, Aggregator};
pub use types::{canonical_hash, Bar};
