//! Timeout and pacing schedule.
//!
//! Converts the controller's target into the value returned by
//! `current_timeout_ms`:
//! - [`ControlMode::Window`]: the retransmission timeout (RTO).
//! - [`ControlMode::Pacing`]: the inter-send interval that spaces `target`
//!   sends evenly over one smoothed RTT. The interval is recomputed once per
//!   round (when `left` runs out or a phase transition happened); between
//!   recomputations each ack only adjusts the remaining time to the scheduled
//!   deadline, nudged by the latest queue gap, so pacing stays smooth.
//!
//! The RTO follows Jacobson/Karels (`srtt + 4 * rttvar`, clamped) and backs
//! off multiplicatively on every send that follows a timeout, until the next
//! RTT sample.

use super::config::{ControlMode, PhaseConfig, MIN_TIMEOUT_MS};

#[derive(Debug)]
pub(crate) struct PacingScheduler {
    mode: ControlMode,
    min_rto_ms: f64,
    max_rto_ms: f64,
    rto_backoff: f64,
    /// Current timeout baseline (ms).
    rto_ms: f64,
    /// RTT variation for the RTO (ms). `None` before the first sample.
    rttvar_ms: Option<f64>,
    /// Spacing between sends for the current round (ms).
    interval_ms: f64,
    /// Sends remaining before the spacing is recomputed.
    left: u32,
    /// Absolute deadline of the next send on the sender clock (ms).
    next_transmission_ms: Option<u64>,
    /// Value exposed by `current_timeout_ms`.
    pending_timeout_ms: f64,
    /// Set by a timeout, cleared by the next ack.
    backed_off: bool,
}

impl PacingScheduler {
    pub(crate) fn new(config: &PhaseConfig) -> Self {
        Self {
            mode: config.mode,
            min_rto_ms: config.min_rto_ms,
            max_rto_ms: config.max_rto_ms,
            rto_backoff: config.rto_backoff,
            rto_ms: config.initial_rto_ms,
            rttvar_ms: None,
            interval_ms: config.initial_rto_ms,
            left: 0,
            next_transmission_ms: None,
            pending_timeout_ms: config.initial_rto_ms,
            backed_off: false,
        }
    }

    /// Recompute the RTO from the smoothed RTT and a fresh sample.
    ///
    /// Clears any backoff accumulated by timeouts.
    pub(crate) fn on_rtt_sample(&mut self, smoothed_rtt_ms: f64, sample_ms: f64) {
        let rttvar = match self.rttvar_ms {
            None => sample_ms / 2.0,
            Some(rttvar) => 0.75 * rttvar + 0.25 * (smoothed_rtt_ms - sample_ms).abs(),
        };
        self.rttvar_ms = Some(rttvar);
        self.rto_ms = (smoothed_rtt_ms + 4.0 * rttvar).clamp(self.min_rto_ms, self.max_rto_ms);
    }

    /// Exponential backoff of the timeout baseline after a real timeout.
    pub(crate) fn on_timeout(&mut self) {
        self.rto_ms = (self.rto_ms * self.rto_backoff).min(self.max_rto_ms);
        self.left = 0;
        self.backed_off = true;
        self.pending_timeout_ms = self.rto_ms;
    }

    /// A datagram left at `send_ts`.
    ///
    /// `smoothed_rtt_ms` is `None` until the first ack has been processed.
    pub(crate) fn on_send(
        &mut self,
        send_ts: u64,
        after_timeout: bool,
        target: f64,
        smoothed_rtt_ms: Option<f64>,
    ) {
        if after_timeout {
            self.on_timeout();
        } else if self.backed_off {
            self.pending_timeout_ms = self.rto_ms;
        } else {
            match (self.mode, smoothed_rtt_ms) {
                (ControlMode::Pacing, Some(srtt)) => {
                    if self.left == 0 {
                        self.start_round(srtt, target);
                    }
                    self.left = self.left.saturating_sub(1);
                    self.pending_timeout_ms = self.interval_ms;
                }
                _ => self.pending_timeout_ms = self.rto_ms,
            }
        }
        self.sanitize();
        self.next_transmission_ms = Some(send_ts.saturating_add(self.pending_timeout_ms as u64));
    }

    /// An ack arrived at `now` on the sender clock.
    ///
    /// `transitioned` requests a fresh per-round spacing; otherwise the prior
    /// deadline is carried forward and nudged by `gap_delta_ms`.
    pub(crate) fn on_ack(
        &mut self,
        now: u64,
        transitioned: bool,
        smoothed_rtt_ms: f64,
        target: f64,
        gap_delta_ms: f64,
    ) {
        self.backed_off = false;
        match self.mode {
            ControlMode::Window => self.pending_timeout_ms = self.rto_ms,
            ControlMode::Pacing => {
                match self.next_transmission_ms {
                    Some(deadline) if !transitioned && self.left > 0 => {
                        let remaining = deadline as f64 - now as f64;
                        self.pending_timeout_ms = remaining + gap_delta_ms;
                    }
                    _ => {
                        self.start_round(smoothed_rtt_ms, target);
                        self.pending_timeout_ms = self.interval_ms;
                    }
                }
                self.sanitize();
                self.next_transmission_ms = Some(now.saturating_add(self.pending_timeout_ms as u64));
            }
        }
        self.sanitize();
    }

    fn start_round(&mut self, smoothed_rtt_ms: f64, target: f64) {
        let target = target.max(1.0);
        self.interval_ms = (smoothed_rtt_ms / target).max(MIN_TIMEOUT_MS);
        self.left = (target.ceil() as u32).max(1);
    }

    fn sanitize(&mut self) {
        if !self.pending_timeout_ms.is_finite() {
            tracing::warn!(
                pending = self.pending_timeout_ms,
                rto = self.rto_ms,
                "Non-finite timeout, falling back to RTO"
            );
            self.pending_timeout_ms = self.rto_ms;
        }
        self.pending_timeout_ms = self
            .pending_timeout_ms
            .clamp(MIN_TIMEOUT_MS, self.max_rto_ms.max(MIN_TIMEOUT_MS));
    }

    /// Timeout exposed to the sender loop, whole milliseconds, at least 1.
    pub(crate) fn current_timeout_ms(&self) -> u32 {
        (self.pending_timeout_ms.ceil() as u32).max(1)
    }

    pub(crate) fn rto_ms(&self) -> f64 {
        self.rto_ms
    }

    pub(crate) fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    pub(crate) fn left(&self) -> u32 {
        self.left
    }

    pub(crate) fn next_transmission_ms(&self) -> Option<u64> {
        self.next_transmission_ms
    }
}
