//! Rolling delivery-latency statistics
//!
//! Latency is `ts_recv - ts_event`, so it includes exchange clock skew.
//! Treated as an observability metric, never a correctness gate.

use std::collections::VecDeque;

/// Summary over the current rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub max_ms: i64,
    pub count: usize,
}

impl LatencySummary {
    /// Thresholds above which the summary is logged at warn level
    pub fn is_high(&self) -> bool {
        self.p95_ms > 2000 || self.max_ms > 5000
    }
}

/// Fixed-capacity rolling window of latency samples
#[derive(Debug)]
pub struct LatencyTracker {
    window: VecDeque<i64>,
    capacity: usize,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record one sample, evicting the oldest when full
    pub fn record(&mut self, latency_ms: i64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(latency_ms);
    }

    /// Percentile summary of the current window, or None if empty
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.window.is_empty() {
            return None;
        }
        let mut sorted: Vec<i64> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let n = sorted.len();
        Some(LatencySummary {
            p50_ms: sorted[n / 2],
            p95_ms: sorted[((n as f64 * 0.95) as usize).min(n - 1)],
            max_ms: sorted[n - 1],
            count: n,
        })
    }
}
