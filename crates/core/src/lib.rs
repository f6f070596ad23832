//! Phase-gated, RTT-driven congestion control for datagram transports.
//!
//! The sender reports every transmission and every acknowledgment; the
//! controller answers two questions at any time: how many datagrams may be
//! in flight ([`PhaseController::current_window`]) and how long to wait
//! before sending again absent new acks
//! ([`PhaseController::current_timeout_ms`]).
//!
//! ```
//! use phasecc::PhaseController;
//!
//! let mut cc = PhaseController::new(false);
//! cc.on_datagram_sent(0, 1_000, false);
//! cc.on_ack_received(0, 1_000, 5_000_020, 1_040);
//! assert!(cc.current_window() >= 1);
//! assert!(cc.current_timeout_ms() >= 1);
//! ```
//!
//! Controllers are single-threaded state machines driven through `&mut self`;
//! callers sharing one between tasks wrap it in a lock.

/// Per-event log line. With the construct-time debug flag every event is
/// emitted at DEBUG, otherwise at TRACE.
macro_rules! event {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// Baseline additive-increase/multiplicative-decrease controller.
pub mod aimd;

/// Configuration file format and logger setup.
pub mod config;

/// Algorithm selection and the common controller interface.
pub mod congestion_control;

mod errors;

/// The phase-gated controller.
pub mod phase;

/// Deterministic virtual-time path model and sender loop.
pub mod simulation;

pub use config::{set_logger, Config};
pub use congestion_control::{
    CongestionControl, CongestionControlAlgorithm, CongestionControlConfig,
    CongestionControlStats, CongestionController,
};
pub use errors::ConfigError;
pub use phase::{ControlMode, Phase, PhaseConfig, PhaseController, PhaseStats, RttStatistics};
