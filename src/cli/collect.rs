//! Collect command implementation
//!
//! Wires the feed to one segment writer per symbol. Each writer owns a
//! bounded channel; when a writer falls behind, the router blocks on
//! `send` and backpressure propagates up to the socket read.

use clap::Args;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::feed::{feed_for, Event};
use crate::segment::{run_writer, SegmentWriter, WriterStats};
use crate::telemetry;
use crate::ws::ConnectorState;

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Override the configured symbol list (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
}

impl CollectArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        telemetry::init_metrics(config.telemetry.metrics_port)?;

        let mut feed_config = config.feed.clone();
        if let Some(symbols) = &self.symbols {
            feed_config.symbols = symbols.clone();
        }
        feed_config.symbols = feed_config
            .symbols
            .iter()
            .map(|s| s.to_uppercase())
            .collect();
        anyhow::ensure!(!feed_config.symbols.is_empty(), "No symbols configured");

        // Resolve the exchange adapter before touching the storage tree
        let feed = feed_for(&feed_config)?;

        let raw_root = config.storage.raw_root();
        let capacity = config.storage.channel_capacity;

        let mut writer_txs: HashMap<String, mpsc::Sender<Event>> = HashMap::new();
        let mut writer_handles: Vec<(String, JoinHandle<anyhow::Result<()>>)> = Vec::new();
        let mut writer_stats: Vec<(String, Arc<RwLock<WriterStats>>)> = Vec::new();

        for symbol in &feed_config.symbols {
            let writer = SegmentWriter::new(
                &raw_root,
                symbol.clone(),
                config.storage.rotation_interval_secs,
                config.storage.max_segment_bytes,
            )?;
            let stats = Arc::new(RwLock::new(writer.stats()));
            let (tx, rx) = mpsc::channel(capacity);
            let handle = tokio::spawn(run_writer(rx, writer, stats.clone()));
            writer_handles.push((symbol.clone(), handle));
            writer_txs.insert(symbol.clone(), tx);
            writer_stats.push((symbol.clone(), stats));
        }

        let (mut event_rx, state_rx) = feed.subscribe().await?;

        let state_task = tokio::spawn(watch_connector_state(state_rx));
        let stats_task = tokio::spawn(report_writer_stats(
            writer_stats.clone(),
            writer_txs.clone(),
            capacity,
        ));

        let mut unrouted: u64 = 0;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received, draining writers");
                    break;
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => match writer_txs.get(&event.symbol) {
                            Some(tx) => {
                                if tx.send(event).await.is_err() {
                                    anyhow::bail!("Segment writer stopped unexpectedly");
                                }
                            }
                            None => {
                                unrouted += 1;
                                tracing::debug!(symbol = %event.symbol, "Event for unsubscribed symbol");
                            }
                        },
                        None => {
                            tracing::warn!("Feed channel closed");
                            break;
                        }
                    }
                }
            }
        }

        state_task.abort();
        stats_task.abort();
        drop(writer_txs);
        drop(event_rx);

        let mut first_err: Option<anyhow::Error> = None;
        for (symbol, handle) in writer_handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(symbol = %symbol, error = %e, "Writer exited with error");
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "Writer task panicked");
                    first_err.get_or_insert(anyhow::anyhow!(e));
                }
            }
        }

        for (symbol, stats) in &writer_stats {
            let s = stats.read().await.clone();
            tracing::info!(
                symbol = %symbol,
                events = s.events_written,
                segments = s.segments_sealed,
                "Final writer stats"
            );
        }
        if unrouted > 0 {
            tracing::warn!(unrouted, "Events dropped for unsubscribed symbols");
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn state_code(state: ConnectorState) -> u8 {
    match state {
        ConnectorState::Disconnected => 0,
        ConnectorState::Connecting => 1,
        ConnectorState::Connected => 2,
        ConnectorState::Backoff => 3,
        ConnectorState::Closing => 4,
    }
}

async fn watch_connector_state(mut state_rx: watch::Receiver<ConnectorState>) {
    let initial = *state_rx.borrow();
    telemetry::metrics::set_connector_state(state_code(initial));
    while state_rx.changed().await.is_ok() {
        let state = *state_rx.borrow();
        telemetry::metrics::set_connector_state(state_code(state));
        tracing::info!(%state, "Connector state changed");
    }
}

async fn report_writer_stats(
    writer_stats: Vec<(String, Arc<RwLock<WriterStats>>)>,
    writer_txs: HashMap<String, mpsc::Sender<Event>>,
    capacity: usize,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.tick().await;
    loop {
        interval.tick().await;
        for (symbol, stats) in &writer_stats {
            let s = stats.read().await.clone();
            let depth = writer_txs
                .get(symbol)
                .map(|tx| capacity - tx.capacity())
                .unwrap_or(0);
            telemetry::metrics::set_channel_depth(symbol, depth);
            tracing::info!(
                symbol = %symbol,
                events = s.events_written,
                segments = s.segments_sealed,
                channel_depth = depth,
                "Writer stats"
            );
        }
    }
}
