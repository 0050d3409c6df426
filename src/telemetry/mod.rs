//! Telemetry module
//!
//! Structured logging and Prometheus metrics.

mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;

use crate::config::TelemetryConfig;

/// Guard that cleans up telemetry on drop
pub struct TelemetryGuard {
    _priv: (),
}

/// Initialize logging. The metrics exporter is started separately by
/// long-running commands via [`init_metrics`] so that one-shot jobs
/// never bind the listen port.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    init_logging(&config.log_level)?;

    Ok(TelemetryGuard { _priv: () })
}
