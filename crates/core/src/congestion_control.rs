//! Congestion control interface for datagram senders.
//!
//! This module provides a pluggable interface for congestion control algorithms,
//! allowing selection between different algorithms via configuration.
//!
//! ## Design
//!
//! The design uses enum dispatch rather than trait objects since all algorithm
//! types are known at compile time. This provides:
//! - No vtable indirection on the per-datagram path
//! - Full access to algorithm-specific statistics via pattern matching
//! - Type-safe configuration
//!
//! ## Supported Algorithms
//!
//! - **Phase** (default): phase-gated controller driven by RTT and one-way
//!   queue delay, with randomized capacity probing.
//! - **AIMD**: additive increase, multiplicative decrease on late acks and
//!   timeouts, with a fixed timeout.
//!
//! ## Usage
//!
//! ```
//! use phasecc::congestion_control::{
//!     CongestionControl, CongestionControlAlgorithm, CongestionControlConfig,
//! };
//!
//! let mut controller = CongestionControlConfig::new(CongestionControlAlgorithm::Phase).build();
//! controller.on_datagram_sent(0, 0, false);
//! controller.on_ack_received(0, 0, 25, 50);
//!
//! if let Some(stats) = controller.phase_stats() {
//!     println!("phase: {}", stats.phase);
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aimd::{AimdConfig, AimdController, AimdStats};
use crate::errors::ConfigError;
use crate::phase::{ControlMode, PhaseConfig, PhaseController, PhaseStats};

// =============================================================================
// Algorithm Identification
// =============================================================================

/// Identifies the congestion control algorithm in use.
///
/// Used for configuration (selecting the algorithm), telemetry and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum CongestionControlAlgorithm {
    /// Phase-gated RTT/queue-delay controller.
    #[default]
    Phase,

    /// Additive increase, multiplicative decrease with a fixed timeout.
    Aimd,
}

impl fmt::Display for CongestionControlAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CongestionControlAlgorithm::Phase => write!(f, "Phase"),
            CongestionControlAlgorithm::Aimd => write!(f, "AIMD"),
        }
    }
}

impl FromStr for CongestionControlAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "phase" => Ok(Self::Phase),
            "aimd" => Ok(Self::Aimd),
            other => Err(ConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

// =============================================================================
// Algorithm-Agnostic Statistics
// =============================================================================

/// Algorithm-agnostic congestion control statistics.
///
/// For algorithm-specific statistics, pattern match on the
/// `CongestionController` enum or use [`CongestionController::phase_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CongestionControlStats {
    /// Algorithm identifier.
    pub algorithm: CongestionControlAlgorithm,
    /// Current congestion window (datagrams).
    pub window: u32,
    /// Current timeout (ms).
    pub timeout_ms: u32,
    /// Smoothed RTT, if the algorithm tracks one.
    pub smoothed_rtt_ms: Option<f64>,
    /// Minimum observed RTT, if the algorithm tracks one.
    pub min_rtt_ms: Option<f64>,
    /// Queue delay estimate (ms). Zero for delay-blind algorithms.
    pub queue_delay_ms: f64,
    /// Peak congestion window reached.
    pub peak_window: f64,
    /// Multiplicative decreases applied.
    pub total_decreases: u64,
    /// Sends flagged as following a timeout.
    pub total_timeouts: u64,
}

impl CongestionControlStats {
    /// Delivery rate implied by the window, in datagrams per second.
    ///
    /// Returns 0 when the RTT is unknown or not positive.
    pub fn effective_rate(&self, rtt_ms: f64) -> f64 {
        if !rtt_ms.is_finite() || rtt_ms <= 0.0 {
            return 0.0;
        }
        self.window as f64 * 1000.0 / rtt_ms
    }
}

// =============================================================================
// Congestion Control Trait
// =============================================================================

/// Interface between a datagram sender loop and a congestion controller.
///
/// The sender reports every transmission and every acknowledgment, and asks
/// how many datagrams may be outstanding and how long to wait before sending
/// again if no ack arrives.
///
/// ## Thread Safety
///
/// Events take `&mut self`; implementations are not synchronized internally.
/// They are `Send` so a controller can be moved into the task that owns the
/// socket.
pub trait CongestionControl: Send {
    // =========================================================================
    // Event Handlers
    // =========================================================================

    /// A datagram with sequence number `seq` left at `send_ts` (ms, sender
    /// clock). `after_timeout` is set when the send was triggered by the
    /// sender's retransmission timer.
    fn on_datagram_sent(&mut self, seq: u64, send_ts: u64, after_timeout: bool);

    /// An acknowledgment for `seq` arrived at `ack_recv_ts` (sender clock).
    /// `recv_ts` is when the receiver saw the datagram, on its own clock.
    fn on_ack_received(&mut self, seq: u64, send_ts: u64, recv_ts: u64, ack_recv_ts: u64);

    // =========================================================================
    // State Queries
    // =========================================================================

    /// Datagrams allowed outstanding. Always at least 1.
    fn current_window(&self) -> u32;

    /// Milliseconds to wait before sending again absent new acks. Always at
    /// least 1.
    fn current_timeout_ms(&self) -> u32;

    /// Age (ms) after which an unacknowledged datagram counts as lost.
    ///
    /// Paced controllers report an inter-send interval from
    /// `current_timeout_ms`, which is far too short for loss detection.
    fn retransmission_timeout_ms(&self) -> u32 {
        self.current_timeout_ms()
    }

    /// Whether the sender should space sends by `current_timeout_ms` rather
    /// than filling the window as soon as there is room.
    fn is_paced(&self) -> bool {
        false
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Returns algorithm-agnostic statistics.
    fn stats(&self) -> CongestionControlStats;

    /// Returns the algorithm identifier.
    fn algorithm(&self) -> CongestionControlAlgorithm;
}

// =============================================================================
// Congestion Controller Enum (Dispatch)
// =============================================================================

/// Congestion controller that dispatches to the configured algorithm.
///
/// ## Example: Accessing Algorithm-Specific Stats
///
/// ```
/// use phasecc::congestion_control::{CongestionControlConfig, CongestionController};
///
/// let controller = CongestionControlConfig::default().build();
/// match &controller {
///     CongestionController::Phase(phase) => println!("{}", phase.stats()),
///     CongestionController::Aimd(aimd) => println!("{:?}", aimd.stats()),
/// }
/// ```
#[derive(Debug)]
pub enum CongestionController {
    /// Phase-gated controller.
    Phase(PhaseController),
    /// AIMD controller.
    Aimd(AimdController),
}

impl CongestionControl for CongestionController {
    fn on_datagram_sent(&mut self, seq: u64, send_ts: u64, after_timeout: bool) {
        match self {
            Self::Phase(c) => c.on_datagram_sent(seq, send_ts, after_timeout),
            Self::Aimd(c) => c.on_datagram_sent(seq, send_ts, after_timeout),
        }
    }

    fn on_ack_received(&mut self, seq: u64, send_ts: u64, recv_ts: u64, ack_recv_ts: u64) {
        match self {
            Self::Phase(c) => c.on_ack_received(seq, send_ts, recv_ts, ack_recv_ts),
            Self::Aimd(c) => c.on_ack_received(seq, send_ts, recv_ts, ack_recv_ts),
        }
    }

    fn current_window(&self) -> u32 {
        match self {
            Self::Phase(c) => c.current_window(),
            Self::Aimd(c) => c.current_window(),
        }
    }

    fn current_timeout_ms(&self) -> u32 {
        match self {
            Self::Phase(c) => c.current_timeout_ms(),
            Self::Aimd(c) => c.current_timeout_ms(),
        }
    }

    fn retransmission_timeout_ms(&self) -> u32 {
        match self {
            Self::Phase(c) => CongestionControl::retransmission_timeout_ms(c),
            Self::Aimd(c) => CongestionControl::retransmission_timeout_ms(c),
        }
    }

    fn is_paced(&self) -> bool {
        match self {
            Self::Phase(c) => CongestionControl::is_paced(c),
            Self::Aimd(c) => CongestionControl::is_paced(c),
        }
    }

    fn stats(&self) -> CongestionControlStats {
        match self {
            Self::Phase(c) => CongestionControl::stats(c),
            Self::Aimd(c) => CongestionControl::stats(c),
        }
    }

    fn algorithm(&self) -> CongestionControlAlgorithm {
        match self {
            Self::Phase(_) => CongestionControlAlgorithm::Phase,
            Self::Aimd(_) => CongestionControlAlgorithm::Aimd,
        }
    }
}

// =============================================================================
// PhaseController Implementation of CongestionControl
// =============================================================================

/// Direct implementation of `CongestionControl` for `PhaseController`.
impl CongestionControl for PhaseController {
    fn on_datagram_sent(&mut self, seq: u64, send_ts: u64, after_timeout: bool) {
        PhaseController::on_datagram_sent(self, seq, send_ts, after_timeout)
    }

    fn on_ack_received(&mut self, seq: u64, send_ts: u64, recv_ts: u64, ack_recv_ts: u64) {
        PhaseController::on_ack_received(self, seq, send_ts, recv_ts, ack_recv_ts)
    }

    fn current_window(&self) -> u32 {
        PhaseController::current_window(self)
    }

    fn current_timeout_ms(&self) -> u32 {
        PhaseController::current_timeout_ms(self)
    }

    fn retransmission_timeout_ms(&self) -> u32 {
        (PhaseController::rto_ms(self).ceil() as u32).max(1)
    }

    fn is_paced(&self) -> bool {
        PhaseController::config(self).mode == ControlMode::Pacing
    }

    fn stats(&self) -> CongestionControlStats {
        let s = PhaseController::stats(self);
        CongestionControlStats {
            algorithm: CongestionControlAlgorithm::Phase,
            window: PhaseController::current_window(self),
            timeout_ms: s.timeout_ms,
            smoothed_rtt_ms: s.smoothed_rtt_ms,
            min_rtt_ms: s.min_rtt_ms,
            queue_delay_ms: s.queue_delay_estimate_ms,
            peak_window: s.peak_window,
            total_decreases: s.total_decreases,
            total_timeouts: s.total_timeouts,
        }
    }

    fn algorithm(&self) -> CongestionControlAlgorithm {
        CongestionControlAlgorithm::Phase
    }
}

// =============================================================================
// AimdController Implementation of CongestionControl
// =============================================================================

/// Direct implementation of `CongestionControl` for `AimdController`.
impl CongestionControl for AimdController {
    fn on_datagram_sent(&mut self, seq: u64, send_ts: u64, after_timeout: bool) {
        AimdController::on_datagram_sent(self, seq, send_ts, after_timeout)
    }

    fn on_ack_received(&mut self, seq: u64, send_ts: u64, recv_ts: u64, ack_recv_ts: u64) {
        AimdController::on_ack_received(self, seq, send_ts, recv_ts, ack_recv_ts)
    }

    fn current_window(&self) -> u32 {
        AimdController::current_window(self)
    }

    fn current_timeout_ms(&self) -> u32 {
        AimdController::current_timeout_ms(self)
    }

    fn stats(&self) -> CongestionControlStats {
        let s = AimdController::stats(self);
        CongestionControlStats {
            algorithm: CongestionControlAlgorithm::Aimd,
            window: AimdController::current_window(self),
            timeout_ms: AimdController::current_timeout_ms(self),
            smoothed_rtt_ms: None,
            min_rtt_ms: None,
            queue_delay_ms: 0.0,
            peak_window: s.peak_window,
            total_decreases: s.total_decreases,
            total_timeouts: s.total_timeouts,
        }
    }

    fn algorithm(&self) -> CongestionControlAlgorithm {
        CongestionControlAlgorithm::Aimd
    }
}

impl CongestionController {
    /// Get phase-controller statistics if this is a phase controller.
    pub fn phase_stats(&self) -> Option<PhaseStats> {
        match self {
            Self::Phase(c) => Some(c.stats()),
            Self::Aimd(_) => None,
        }
    }

    /// Get AIMD statistics if this is an AIMD controller.
    pub fn aimd_stats(&self) -> Option<AimdStats> {
        match self {
            Self::Phase(_) => None,
            Self::Aimd(c) => Some(c.stats()),
        }
    }

    /// Get a reference to the inner phase controller if applicable.
    pub fn as_phase(&self) -> Option<&PhaseController> {
        match self {
            Self::Phase(c) => Some(c),
            Self::Aimd(_) => None,
        }
    }

    /// Get a reference to the inner AIMD controller if applicable.
    pub fn as_aimd(&self) -> Option<&AimdController> {
        match self {
            Self::Phase(_) => None,
            Self::Aimd(c) => Some(c),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for creating congestion controllers.
///
/// Specifies which algorithm to use and carries the parameters of every
/// algorithm, so switching algorithms keeps the other's tuning.
///
/// ## Example
///
/// ```
/// use phasecc::congestion_control::{CongestionControlAlgorithm, CongestionControlConfig};
/// use phasecc::{ControlMode, PhaseConfig};
///
/// let config = CongestionControlConfig::from_phase_config(
///     PhaseConfig::default().with_mode(ControlMode::Window),
/// )
/// .with_debug(true);
/// assert_eq!(config.algorithm, CongestionControlAlgorithm::Phase);
/// let controller = config.try_build().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CongestionControlConfig {
    /// Which algorithm to use.
    pub algorithm: CongestionControlAlgorithm,
    /// Emit per-event logs at DEBUG instead of TRACE.
    pub debug: bool,
    /// Phase controller parameters.
    pub phase: PhaseConfig,
    /// AIMD controller parameters.
    pub aimd: AimdConfig,
}

impl CongestionControlConfig {
    /// Create a new configuration for the specified algorithm with defaults.
    pub fn new(algorithm: CongestionControlAlgorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }

    /// Create a configuration for the AIMD controller with defaults.
    pub fn aimd() -> Self {
        Self::new(CongestionControlAlgorithm::Aimd)
    }

    /// Create a configuration from an existing PhaseConfig.
    pub fn from_phase_config(config: PhaseConfig) -> Self {
        Self {
            algorithm: CongestionControlAlgorithm::Phase,
            phase: config,
            ..Default::default()
        }
    }

    /// Create a configuration from an existing AimdConfig.
    pub fn from_aimd_config(config: AimdConfig) -> Self {
        Self {
            algorithm: CongestionControlAlgorithm::Aimd,
            aimd: config,
            ..Default::default()
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Fix the seed of the phase controller's probe coin.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.phase.seed = Some(seed);
        self
    }

    /// Validate the parameters of the selected algorithm.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.algorithm {
            CongestionControlAlgorithm::Phase => self.phase.validate(),
            CongestionControlAlgorithm::Aimd => self.aimd.validate(),
        }
    }

    /// Build a congestion controller from this configuration.
    ///
    /// Parameters are used as given; see [`try_build`](Self::try_build).
    pub fn build(&self) -> CongestionController {
        tracing::debug!(algorithm = %self.algorithm, debug = self.debug, "Building congestion controller");
        match self.algorithm {
            CongestionControlAlgorithm::Phase => {
                CongestionController::Phase(PhaseController::with_config(self.phase.clone(), self.debug))
            }
            CongestionControlAlgorithm::Aimd => {
                CongestionController::Aimd(AimdController::new(self.aimd.clone(), self.debug))
            }
        }
    }

    /// Validate, then build.
    pub fn try_build(&self) -> Result<CongestionController, ConfigError> {
        self.validate()?;
        Ok(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;

    #[test]
    fn test_default_config_creates_phase() {
        let config = CongestionControlConfig::default();
        assert_eq!(config.algorithm, CongestionControlAlgorithm::Phase);
        let controller = config.build();
        assert!(matches!(controller, CongestionController::Phase(_)));
        assert_eq!(controller.algorithm(), CongestionControlAlgorithm::Phase);
    }

    #[test]
    fn test_build_aimd_controller() {
        let controller = CongestionControlConfig::aimd().build();
        assert!(matches!(controller, CongestionController::Aimd(_)));
        assert_eq!(controller.current_timeout_ms(), 150);
        assert!(controller.as_aimd().is_some());
        assert!(controller.as_phase().is_none());
        assert!(controller.phase_stats().is_none());
    }

    #[test]
    fn test_basic_send_ack_flow() {
        for algorithm in [CongestionControlAlgorithm::Phase, CongestionControlAlgorithm::Aimd] {
            let mut controller = CongestionControlConfig::new(algorithm).with_seed(9).build();
            assert_eq!(controller.current_window(), 1);
            controller.on_datagram_sent(0, 0, false);
            controller.on_ack_received(0, 0, 25, 50);
            assert!(controller.current_window() > 1, "{algorithm} should grow");
            assert!(controller.current_timeout_ms() >= 1);
        }
    }

    #[test]
    fn test_stats_conversion() {
        let mut controller = CongestionControlConfig::default().with_seed(1).build();
        controller.on_datagram_sent(0, 0, false);
        controller.on_ack_received(0, 0, 25, 50);

        let stats = controller.stats();
        assert_eq!(stats.algorithm, CongestionControlAlgorithm::Phase);
        assert_eq!(stats.window, controller.current_window());
        assert_eq!(stats.min_rtt_ms, Some(50.0));
        assert_eq!(stats.timeout_ms, controller.current_timeout_ms());
    }

    #[test]
    fn test_phase_specific_stats_access() {
        let mut controller = CongestionControlConfig::default().with_seed(2).build();
        controller.on_datagram_sent(0, 0, false);
        controller.on_ack_received(0, 0, 25, 50);

        let stats = controller.phase_stats().expect("phase controller");
        assert_eq!(stats.phase, Phase::Stable);
        assert_eq!(stats.total_acks, 1);
        assert!(controller.aimd_stats().is_none());
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "phase".parse::<CongestionControlAlgorithm>().unwrap(),
            CongestionControlAlgorithm::Phase
        );
        assert_eq!(
            " AIMD ".parse::<CongestionControlAlgorithm>().unwrap(),
            CongestionControlAlgorithm::Aimd
        );
        assert!(matches!(
            "cubic".parse::<CongestionControlAlgorithm>(),
            Err(ConfigError::UnknownAlgorithm(name)) if name == "cubic"
        ));
    }

    #[test]
    fn test_try_build_validates_selected_algorithm() {
        let mut config = CongestionControlConfig::default();
        config.aimd.beta = 2.0;
        // AIMD parameters are not used by the phase controller
        assert!(config.try_build().is_ok());

        config.algorithm = CongestionControlAlgorithm::Aimd;
        assert!(config.try_build().is_err());
    }

    #[test]
    fn test_effective_rate() {
        let stats = CongestionControlStats {
            algorithm: CongestionControlAlgorithm::Phase,
            window: 10,
            timeout_ms: 5,
            smoothed_rtt_ms: Some(50.0),
            min_rtt_ms: Some(50.0),
            queue_delay_ms: 0.0,
            peak_window: 10.0,
            total_decreases: 0,
            total_timeouts: 0,
        };
        assert_eq!(stats.effective_rate(50.0), 200.0);
        assert_eq!(stats.effective_rate(0.0), 0.0);
        assert_eq!(stats.effective_rate(f64::NAN), 0.0);
    }

    #[test]
    fn test_controller_implements_trait() {
        fn drive<C: CongestionControl>(controller: &mut C) -> u32 {
            controller.on_datagram_sent(0, 0, false);
            controller.on_ack_received(0, 0, 10, 20);
            controller.current_window()
        }

        let mut phase = PhaseController::with_config(PhaseConfig::default().with_seed(3), false);
        let mut aimd = AimdController::new(AimdConfig::default(), false);
        assert!(drive(&mut phase) >= 2);
        assert_eq!(drive(&mut aimd), 3);

        assert!(phase.is_paced());
        assert!(!aimd.is_paced());
        // paced interval is shorter than the loss timer
        assert!(CongestionControl::current_timeout_ms(&phase) < phase.retransmission_timeout_ms());
        assert_eq!(aimd.retransmission_timeout_ms(), 150);
    }
}
