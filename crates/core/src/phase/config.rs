//! Phase controller configuration and constants.
//!
//! Every tuning constant of the controller lives here as a named default and
//! as a field of [`PhaseConfig`], so a controller instance never reads
//! process-wide mutable state and tests can sweep any parameter.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Additive increase numerator: `window += ALPHA / window` per ack in Stable.
pub(crate) const ALPHA: f64 = 1.0;

/// Multiplicative decrease factor applied on halving, panic and timeout.
pub(crate) const BETA: f64 = 0.7;

/// Target inflation applied over one round when probing for spare capacity.
pub(crate) const PROBE_GAIN: f64 = 1.25;

/// Partial recovery applied during Cooldown. A cooldown never goes below the
/// pre-probe baseline, so a successful probe keeps `PROBE_GAIN * COOLDOWN_FACTOR`.
pub(crate) const COOLDOWN_FACTOR: f64 = 0.9;

/// Reduction of the baseline when a probe is judged unsuccessful.
pub(crate) const FALLBACK_FACTOR: f64 = 0.9;

/// Probability of probing at the end of a Stable round after a phase reset.
pub(crate) const BASE_PROBE_PROBABILITY: f64 = 0.4;

/// Growth of the probe probability each time a probe opportunity is declined.
pub(crate) const PROBE_PROBABILITY_GROWTH: f64 = 1.1;

/// EWMA weight kept on history for the smoothed RTT.
pub(crate) const RTT_HISTORY_WEIGHT: f64 = 0.9;

/// EWMA weight kept on history for the queue delay estimate.
pub(crate) const QUEUE_HISTORY_WEIGHT: f64 = 0.9;

/// Panic when the instantaneous queue exceeds this multiple of its smoothed value.
pub(crate) const PANIC_QUEUE_RATIO: f64 = 3.0;

/// Panic when the latest RTT exceeds this multiple of the retained minimum.
pub(crate) const PANIC_RTT_RATIO: f64 = 2.0;

/// Queue occupancy (ms) under which the path is considered drained.
pub(crate) const STABLE_QUEUE_MS: f64 = 10.0;

/// The path is also drained when the latest RTT is within this ratio of the minimum.
pub(crate) const STABLE_RTT_RATIO: f64 = 1.1;

/// Cooldown success: widest-to-narrowest retained RTT below this ratio.
pub(crate) const SPREAD_RATIO_THRESHOLD: f64 = 1.5;

/// Cooldown success: coefficient of variation of retained RTTs below this value.
pub(crate) const SPREAD_CV_THRESHOLD: f64 = 0.1;

/// Sample retention multipliers (`K`), in units of the latest RTT.
pub(crate) const RETENTION_UNSTABLE: f64 = 2.0;
pub(crate) const RETENTION_STABLE: f64 = 3.0;
pub(crate) const RETENTION_PROBING: f64 = 4.0;

/// Retransmission timeout before any RTT sample (ms).
pub(crate) const INITIAL_RTO_MS: f64 = 1000.0;
pub(crate) const MIN_RTO_MS: f64 = 200.0;
pub(crate) const MAX_RTO_MS: f64 = 60_000.0;

/// RTO multiplier applied on every send that follows a timeout.
pub(crate) const RTO_BACKOFF: f64 = 2.0;

/// Fixed timeout for callers that want the window-only fallback.
pub(crate) const WINDOW_TIMEOUT_MS: u32 = 80;

/// Floor applied to apparent RTT samples (ms).
pub(crate) const MIN_RTT_SAMPLE_MS: f64 = 1.0;

/// Floor applied to the pacing interval and the reported timeout (ms).
pub(crate) const MIN_TIMEOUT_MS: f64 = 1.0;

/// Denominator guard for ratios over smoothed quantities.
pub(crate) const EPSILON: f64 = 1e-6;

/// How the controller tells the sender loop when to transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlMode {
    /// Only the window matters; `current_timeout_ms` is the retransmission timeout.
    Window,
    /// Sends are spaced evenly across a round; `current_timeout_ms` is the
    /// inter-send interval.
    #[default]
    Pacing,
}

/// Configuration for the phase-gated controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PhaseConfig {
    /// Window-based or pacing-based operation.
    pub mode: ControlMode,
    /// Additive increase numerator.
    pub alpha: f64,
    /// Multiplicative decrease factor, in (0, 1).
    pub beta: f64,
    /// Probe inflation factor, > 1.
    pub probe_gain: f64,
    /// Cooldown partial-recovery factor, in (0, 1].
    pub cooldown_factor: f64,
    /// Baseline reduction after an unsuccessful probe, in (0, 1].
    pub fallback_factor: f64,
    /// Probe probability after a phase reset.
    pub base_probe_probability: f64,
    /// Probe probability growth per declined opportunity.
    pub probe_probability_growth: f64,
    /// EWMA history weight for the smoothed RTT.
    pub rtt_history_weight: f64,
    /// EWMA history weight for the queue delay estimate.
    pub queue_history_weight: f64,
    /// Panic threshold on `q / queue_delay_estimate`.
    pub panic_queue_ratio: f64,
    /// Panic threshold on `latest_rtt / min_rtt`.
    pub panic_rtt_ratio: f64,
    /// Queue occupancy (ms) considered drained.
    pub stable_queue_ms: f64,
    /// RTT ratio to the minimum considered drained.
    pub stable_rtt_ratio: f64,
    /// Cooldown success threshold on `max_rtt / min_rtt`.
    pub spread_ratio_threshold: f64,
    /// Cooldown success threshold on `stddev / mean`.
    pub spread_cv_threshold: f64,
    /// Sample retention multiplier while Unstable.
    pub retention_unstable: f64,
    /// Sample retention multiplier while Stable.
    pub retention_stable: f64,
    /// Sample retention multiplier while in Probe or Cooldown.
    pub retention_probing: f64,
    /// RTO before the first sample (ms).
    pub initial_rto_ms: f64,
    /// Lower bound of the RTO (ms).
    pub min_rto_ms: f64,
    /// Upper bound of the RTO, also caps backoff (ms).
    pub max_rto_ms: f64,
    /// RTO multiplier per timeout.
    pub rto_backoff: f64,
    /// Fixed timeout reported by [`crate::PhaseController::window_timeout_ms`].
    pub window_timeout_ms: u32,
    /// Seed for the probe coin flip. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::default(),
            alpha: ALPHA,
            beta: BETA,
            probe_gain: PROBE_GAIN,
            cooldown_factor: COOLDOWN_FACTOR,
            fallback_factor: FALLBACK_FACTOR,
            base_probe_probability: BASE_PROBE_PROBABILITY,
            probe_probability_growth: PROBE_PROBABILITY_GROWTH,
            rtt_history_weight: RTT_HISTORY_WEIGHT,
            queue_history_weight: QUEUE_HISTORY_WEIGHT,
            panic_queue_ratio: PANIC_QUEUE_RATIO,
            panic_rtt_ratio: PANIC_RTT_RATIO,
            stable_queue_ms: STABLE_QUEUE_MS,
            stable_rtt_ratio: STABLE_RTT_RATIO,
            spread_ratio_threshold: SPREAD_RATIO_THRESHOLD,
            spread_cv_threshold: SPREAD_CV_THRESHOLD,
            retention_unstable: RETENTION_UNSTABLE,
            retention_stable: RETENTION_STABLE,
            retention_probing: RETENTION_PROBING,
            initial_rto_ms: INITIAL_RTO_MS,
            min_rto_ms: MIN_RTO_MS,
            max_rto_ms: MAX_RTO_MS,
            rto_backoff: RTO_BACKOFF,
            window_timeout_ms: WINDOW_TIMEOUT_MS,
            seed: None,
        }
    }
}

impl PhaseConfig {
    /// Set the control mode.
    pub fn with_mode(mut self, mode: ControlMode) -> Self {
        self.mode = mode;
        self
    }

    /// Seed the probe coin flip for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check that every parameter keeps the controller invariants intact.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("probe-gain", self.probe_gain),
            ("cooldown-factor", self.cooldown_factor),
            ("fallback-factor", self.fallback_factor),
            ("base-probe-probability", self.base_probe_probability),
            ("probe-probability-growth", self.probe_probability_growth),
            ("rtt-history-weight", self.rtt_history_weight),
            ("queue-history-weight", self.queue_history_weight),
            ("panic-queue-ratio", self.panic_queue_ratio),
            ("panic-rtt-ratio", self.panic_rtt_ratio),
            ("stable-queue-ms", self.stable_queue_ms),
            ("stable-rtt-ratio", self.stable_rtt_ratio),
            ("spread-ratio-threshold", self.spread_ratio_threshold),
            ("spread-cv-threshold", self.spread_cv_threshold),
            ("retention-unstable", self.retention_unstable),
            ("retention-stable", self.retention_stable),
            ("retention-probing", self.retention_probing),
            ("initial-rto-ms", self.initial_rto_ms),
            ("min-rto-ms", self.min_rto_ms),
            ("max-rto-ms", self.max_rto_ms),
            ("rto-backoff", self.rto_backoff),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::invalid(field, "must be a positive finite number"));
            }
        }

        if self.beta >= 1.0 {
            return Err(ConfigError::invalid("beta", "must be below 1"));
        }
        if self.probe_gain <= 1.0 {
            return Err(ConfigError::invalid("probe-gain", "must be above 1"));
        }
        if self.cooldown_factor > 1.0 {
            return Err(ConfigError::invalid("cooldown-factor", "must not exceed 1"));
        }
        if self.fallback_factor > 1.0 {
            return Err(ConfigError::invalid("fallback-factor", "must not exceed 1"));
        }
        if self.base_probe_probability > 1.0 {
            return Err(ConfigError::invalid(
                "base-probe-probability",
                "must not exceed 1",
            ));
        }
        if self.probe_probability_growth < 1.0 {
            return Err(ConfigError::invalid(
                "probe-probability-growth",
                "must be at least 1",
            ));
        }
        if self.rtt_history_weight >= 1.0 || self.queue_history_weight >= 1.0 {
            return Err(ConfigError::invalid(
                "history-weight",
                "EWMA history weights must be below 1",
            ));
        }
        if self.min_rto_ms > self.max_rto_ms {
            return Err(ConfigError::invalid(
                "min-rto-ms",
                format!("{} exceeds max-rto-ms {}", self.min_rto_ms, self.max_rto_ms),
            ));
        }
        if self.rto_backoff < 1.0 {
            return Err(ConfigError::invalid("rto-backoff", "must be at least 1"));
        }
        if self.window_timeout_ms == 0 {
            return Err(ConfigError::invalid("window-timeout-ms", "must be positive"));
        }
        Ok(())
    }
}
