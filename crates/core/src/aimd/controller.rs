//! AIMD controller implementation.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default fixed timeout (ms). Acks slower than this count as congestion.
pub const DEFAULT_TIMEOUT_MS: u32 = 150;

const DEFAULT_ALPHA: f64 = 2.0;
const DEFAULT_BETA: f64 = 0.5;

/// Configuration for the AIMD controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AimdConfig {
    /// Window growth per window's worth of acks.
    pub alpha: f64,
    /// Multiplicative decrease factor.
    pub beta: f64,
    /// Fixed timeout (ms), both as the late-ack threshold and as the value
    /// returned by `current_timeout_ms`.
    pub timeout_ms: u32,
}

impl Default for AimdConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl AimdConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(ConfigError::invalid(
                "aimd.alpha",
                "must be a positive finite number",
            ));
        }
        if !self.beta.is_finite() || self.beta <= 0.0 || self.beta >= 1.0 {
            return Err(ConfigError::invalid("aimd.beta", "must be in (0, 1)"));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("aimd.timeout-ms", "must be positive"));
        }
        Ok(())
    }
}

/// Snapshot of AIMD controller state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AimdStats {
    pub window: f64,
    pub total_increases: u64,
    pub total_decreases: u64,
    pub total_timeouts: u64,
    pub late_acks: u64,
    pub peak_window: f64,
}

/// AIMD congestion controller.
///
/// Same call surface as [`PhaseController`](crate::PhaseController), with a
/// constant timeout.
#[derive(Debug)]
pub struct AimdController {
    config: AimdConfig,
    debug: bool,
    window: f64,
    total_increases: u64,
    total_decreases: u64,
    total_timeouts: u64,
    late_acks: u64,
    peak_window: f64,
}

impl AimdController {
    pub fn new(config: AimdConfig, debug: bool) -> Self {
        Self {
            config,
            debug,
            window: 1.0,
            total_increases: 0,
            total_decreases: 0,
            total_timeouts: 0,
            late_acks: 0,
            peak_window: 1.0,
        }
    }

    pub fn on_datagram_sent(&mut self, seq: u64, send_ts: u64, after_timeout: bool) {
        if after_timeout {
            self.total_timeouts += 1;
            self.decrease();
            tracing::debug!(seq, window = self.window, "Timeout: window cut");
        }
        event!(self.debug, seq, send_ts, after_timeout, window = self.window, "Datagram sent");
    }

    pub fn on_ack_received(&mut self, seq: u64, send_ts: u64, recv_ts: u64, ack_recv_ts: u64) {
        let rtt = ack_recv_ts.saturating_sub(send_ts);
        if rtt > u64::from(self.config.timeout_ms) {
            self.late_acks += 1;
            self.decrease();
        } else {
            self.window += self.config.alpha / self.window;
            self.total_increases += 1;
        }
        self.peak_window = self.peak_window.max(self.window);

        event!(
            self.debug,
            seq,
            send_ts,
            recv_ts,
            ack_recv_ts,
            rtt_ms = rtt,
            window = self.window,
            "Ack received"
        );
    }

    pub fn current_window(&self) -> u32 {
        (self.window.floor() as u32).max(1)
    }

    pub fn current_timeout_ms(&self) -> u32 {
        self.config.timeout_ms
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn config(&self) -> &AimdConfig {
        &self.config
    }

    pub fn stats(&self) -> AimdStats {
        AimdStats {
            window: self.window,
            total_increases: self.total_increases,
            total_decreases: self.total_decreases,
            total_timeouts: self.total_timeouts,
            late_acks: self.late_acks,
            peak_window: self.peak_window,
        }
    }

    fn decrease(&mut self) {
        self.window = (self.window * self.config.beta).max(1.0);
        self.total_decreases += 1;
    }
}
