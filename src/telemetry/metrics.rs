//! Prometheus metrics

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on the given port.
///
/// Must run inside a tokio runtime. Only the `collect` command calls
/// this; batch jobs stay silent so concurrent runs never fight over
/// the port.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter on {}: {}", addr, e))?;

    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Record exchange-to-receipt latency for one event
pub fn record_feed_latency(latency_ms: f64) {
    histogram!("tickvault_feed_latency_ms").record(latency_ms);
}

/// Count an ingested event by kind ("trade" or "quote")
pub fn incr_event(kind: &'static str) {
    counter!("tickvault_events_total", "kind" => kind).increment(1);
}

/// Count a message that failed to parse and was dropped
pub fn incr_dropped_message() {
    counter!("tickvault_dropped_messages_total").increment(1);
}

/// Count a reconnect attempt against the upstream feed
pub fn incr_reconnect() {
    counter!("tickvault_reconnects_total").increment(1);
}

/// Count a sealed segment for a symbol
pub fn incr_segment_sealed(symbol: &str) {
    counter!("tickvault_segments_sealed_total", "symbol" => symbol.to_owned()).increment(1);
}

/// Export the connector state as a numeric gauge
pub fn set_connector_state(state: u8) {
    gauge!("tickvault_connector_state").set(state as f64);
}

/// Export the depth of a symbol's write channel
pub fn set_channel_depth(symbol: &str, depth: usize) {
    gauge!("tickvault_channel_depth", "symbol" => symbol.to_owned()).set(depth as f64);
}
