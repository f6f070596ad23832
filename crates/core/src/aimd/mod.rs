//! Additive-increase/multiplicative-decrease congestion controller.
//!
//! A delay-blind baseline next to the phase controller: every timely ack
//! grows the window by `alpha / window`, every ack slower than a fixed timeout
//! and every timed-out send cut it by `beta`. The timeout itself never adapts.
//!
//! Useful as a reference point when comparing runs of the simulator, and as a
//! fallback when the delay signals of a path are unreliable.
//!
//! ## Usage
//!
//! ```
//! use phasecc::congestion_control::{CongestionControl, CongestionControlConfig};
//!
//! let controller = CongestionControlConfig::aimd().build();
//! assert_eq!(controller.current_window(), 1);
//! ```

mod controller;

pub use controller::{AimdConfig, AimdController, AimdStats, DEFAULT_TIMEOUT_MS};
