//! Simulation results.

use std::fmt;

use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::congestion_control::{CongestionControlAlgorithm, CongestionControlStats};

/// Periodic snapshot of the sender.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub time_ms: u64,
    pub window: u32,
    pub timeout_ms: u32,
    pub in_flight: usize,
    /// Datagrams queued at the bottleneck.
    pub queue_len: usize,
}

/// Summary of one simulated transfer.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub algorithm: CongestionControlAlgorithm,
    pub sent: u64,
    pub delivered: u64,
    /// Datagrams dropped by the link (tail drop or random loss).
    pub dropped: u64,
    /// Sends triggered by the retransmission timer.
    pub timeouts: u64,
    pub duration_ms: u64,
    /// Delivered datagrams per second.
    pub throughput: f64,
    pub mean_rtt_ms: f64,
    pub p95_rtt_ms: f64,
    pub final_window: u32,
    pub controller: CongestionControlStats,
    pub samples: Vec<Sample>,
}

impl SimulationReport {
    /// Throughput over mean RTT, in datagrams per second per second.
    ///
    /// The score favors high throughput at low delay; 0 without RTT samples.
    pub fn power(&self) -> f64 {
        if self.mean_rtt_ms <= 0.0 {
            return 0.0;
        }
        self.throughput / (self.mean_rtt_ms / 1000.0)
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "algorithm:     {}", self.algorithm)?;
        writeln!(f, "duration:      {} ms", self.duration_ms)?;
        writeln!(
            f,
            "datagrams:     sent={} delivered={} dropped={} timeouts={}",
            self.sent, self.delivered, self.dropped, self.timeouts
        )?;
        writeln!(f, "throughput:    {:.1} datagrams/s", self.throughput)?;
        writeln!(
            f,
            "rtt:           mean={:.1} ms p95={:.1} ms",
            self.mean_rtt_ms, self.p95_rtt_ms
        )?;
        writeln!(f, "power:         {:.1}", self.power())?;
        writeln!(
            f,
            "window rate:   {:.1} datagrams/s at mean rtt",
            self.controller.effective_rate(self.mean_rtt_ms)
        )?;
        write!(
            f,
            "final window:  {} (peak {:.1})",
            self.final_window, self.controller.peak_window
        )
    }
}

/// Mean and 95th percentile of `values`; zeros when empty.
pub(crate) fn mean_and_p95(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by_key(|&v| OrderedFloat(v));
    let rank = ((0.95 * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    (mean, sorted[rank - 1])
}
