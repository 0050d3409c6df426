//! tickvault: gap-aware market data capture and archival pipeline
//!
//! This library provides the core components for:
//! - Resilient WebSocket ingestion of trades and top-of-book quotes
//! - Normalization into a single canonical event model
//! - Durable, rotating raw-event segment files per symbol
//! - Deterministic fixed-window bar aggregation with explicit gaps
//! - Daily compaction with continuity checks and content hashing
//! - Structured logging and Prometheus metrics

pub mod archive;
pub mod bars;
pub mod cli;
pub mod config;
pub mod feed;
pub mod segment;
pub mod telemetry;
pub mod ws;
