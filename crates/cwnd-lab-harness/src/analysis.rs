//! Derived metrics. Every function here is pure and looks only at the run
//! it is given.

use cwnd_lab_abstract::{CongestionWindowSample, FlowRecord};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("measurement duration must be positive and finite, got {0} s")]
    InvalidDuration(f64),
}

/// Number of window changes that shrank the window.
pub fn reduction_count(samples: &[CongestionWindowSample]) -> usize {
    samples.iter().filter(|s| s.is_reduction()).count()
}

/// Average goodput over all flows: received bytes in megabits per second.
pub fn throughput_mbps<'a, I>(records: I, duration_s: f64) -> Result<f64, AnalysisError>
where
    I: IntoIterator<Item = &'a FlowRecord>,
{
    if !duration_s.is_finite() || duration_s <= 0.0 {
        return Err(AnalysisError::InvalidDuration(duration_s));
    }
    let rx_bytes: u64 = records.into_iter().map(|r| r.rx_bytes).sum();
    Ok(rx_bytes as f64 * 8.0 / duration_s / 1e6)
}

/// One point of the latency-vs-throughput chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyThroughputPoint {
    pub delay_ms: f64,
    pub throughput_mbps: f64,
}

pub fn latency_throughput_point(delay_ms: f64, throughput_mbps: f64) -> LatencyThroughputPoint {
    LatencyThroughputPoint {
        delay_ms,
        throughput_mbps,
    }
}

/// `(seconds, window after the change)` pairs for plotting.
pub fn window_series(samples: &[CongestionWindowSample]) -> Vec<(f64, f64)> {
    samples
        .iter()
        .map(|s| (s.time.as_secs_f64(), s.new_window as f64))
        .collect()
}
