//! Phase-gated RTT/queue-delay congestion controller.
//!
//! The controller drives a sender of small datagrams from two delay signals:
//! round-trip time samples and a one-way queue occupancy estimate derived
//! from the receiver's timestamps. It answers two questions for the sender
//! loop: how many datagrams may be outstanding, and how long to wait before
//! the next send.
//!
//! ## Key Concepts
//!
//! - **window**: datagrams allowed outstanding (real-valued, floor of 1)
//! - **target**: pacing target in datagrams per RTT; the window follows it
//! - **round**: the next `ceil(window)` acks after a phase or round start
//! - **q**: queue occupancy, accumulated from `recv_gap - send_gap`
//! - **RTO**: `srtt + 4 * rttvar`, clamped, doubled per timed-out send
//!
//! ## State Machine
//!
//! | Phase | Growth | Exit |
//! |-------|--------|------|
//! | Unstable | none, one `beta` cut per round | queue drained → Stable |
//! | Stable | `+alpha` per round | round end, coin flip → Probe |
//! | Probe | target → `target * probe_gain` over one round | round end → Cooldown |
//! | Cooldown | target → `max(baseline, target * cooldown_factor)` | round end, RTT spread judged |
//!
//! A panic (queue or RTT spike) from Stable or Probe, or a late ack from any
//! phase but Unstable, cuts by `beta` and forces Unstable. A cut during Probe
//! first reverts the window to the probe's baseline.
//!
//! ## Control modes
//!
//! In [`ControlMode::Pacing`] the timeout spaces the window evenly over one
//! smoothed RTT. In [`ControlMode::Window`] it is the RTO and the sender is
//! expected to fill the window whenever it has room.

mod config;
mod controller;
mod pacing;
mod rtt;
mod state;
mod stats;

#[cfg(test)]
mod tests;

// Re-export public API
pub use config::{ControlMode, PhaseConfig};
pub use controller::PhaseController;
pub use rtt::RttStatistics;
pub use state::Phase;
pub use stats::PhaseStats;
