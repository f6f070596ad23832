//! Phase controller statistics for telemetry and debugging.
//!
//! A snapshot of the controller state, suitable for logging and for the
//! simulation report.

use serde::Serialize;

use super::config::ControlMode;
use super::state::Phase;

/// Snapshot of phase controller state for telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseStats {
    /// Current phase (Unstable, Stable, Probe, Cooldown).
    pub phase: Phase,

    /// Whether the timeout reports pacing spacing or the RTO.
    pub mode: ControlMode,

    /// Congestion window (datagrams, real-valued).
    pub window: f64,

    /// Pacing target (datagrams per RTT).
    pub target: f64,

    /// Acks left in the current round.
    pub outstanding: u32,

    /// Sends minus acks seen by the controller.
    pub in_flight: u64,

    /// Smoothed RTT (ms).
    pub smoothed_rtt_ms: Option<f64>,

    /// Windowed minimum RTT (ms).
    pub min_rtt_ms: Option<f64>,

    /// Most recent RTT sample (ms).
    pub latest_rtt_ms: Option<f64>,

    /// Instantaneous queue occupancy (ms).
    pub queue_ms: f64,

    /// Smoothed queue occupancy (ms).
    pub queue_delay_estimate_ms: f64,

    /// Chance of starting a probe at the next Stable round end.
    pub probe_probability: f64,

    /// Value currently returned by `current_timeout_ms`.
    pub timeout_ms: u32,

    /// Retransmission timeout baseline (ms).
    pub rto_ms: f64,

    /// Pacing interval for the current round (ms).
    pub pacing_interval_ms: f64,

    /// Paced sends left before the interval is recomputed.
    pub pacing_left: u32,

    /// Scheduled time of the next send (sender clock, ms).
    pub next_transmission_ms: Option<u64>,

    pub total_sends: u64,
    pub total_acks: u64,
    pub total_increases: u64,
    pub total_decreases: u64,
    pub total_timeouts: u64,

    /// Acks whose RTT exceeded the timeout baseline.
    pub late_acks: u64,

    /// Panic escapes from Stable or Probe.
    pub panics: u64,

    /// Probes started.
    pub probes: u64,
    pub successful_probes: u64,
    pub failed_probes: u64,

    /// Acks whose sequence number did not advance.
    pub reordered_acks: u64,

    /// Largest window ever reached.
    pub peak_window: f64,
}

impl Default for PhaseStats {
    fn default() -> Self {
        Self {
            phase: Phase::Unstable,
            mode: ControlMode::default(),
            window: 1.0,
            target: 1.0,
            outstanding: 0,
            in_flight: 0,
            smoothed_rtt_ms: None,
            min_rtt_ms: None,
            latest_rtt_ms: None,
            queue_ms: 0.0,
            queue_delay_estimate_ms: 0.0,
            probe_probability: 0.0,
            timeout_ms: 1,
            rto_ms: 0.0,
            pacing_interval_ms: 0.0,
            pacing_left: 0,
            next_transmission_ms: None,
            total_sends: 0,
            total_acks: 0,
            total_increases: 0,
            total_decreases: 0,
            total_timeouts: 0,
            late_acks: 0,
            panics: 0,
            probes: 0,
            successful_probes: 0,
            failed_probes: 0,
            reordered_acks: 0,
            peak_window: 1.0,
        }
    }
}

impl PhaseStats {
    /// Fraction of started probes judged successful.
    pub fn probe_success_rate(&self) -> Option<f64> {
        let judged = self.successful_probes + self.failed_probes;
        (judged > 0).then(|| self.successful_probes as f64 / judged as f64)
    }
}

impl std::fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Phase[{}] window={:.2} outstanding={} srtt={} min_rtt={} queue={:.1}ms timeout={}ms",
            self.phase,
            self.window,
            self.outstanding,
            format_ms(self.smoothed_rtt_ms),
            format_ms(self.min_rtt_ms),
            self.queue_delay_estimate_ms,
            self.timeout_ms,
        )
    }
}

fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(ms) => format!("{ms:.1}ms"),
        None => "-".to_string(),
    }
}
