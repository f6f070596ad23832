//! Deterministic virtual-time simulation of a sender behind a bottleneck.
//!
//! Everything runs on integer-millisecond virtual time with seeded
//! randomness, so a run is fully reproducible from its [`LinkConfig`] seed and
//! the controller's seed.
//!
//! - [`Link`]: FIFO bottleneck with propagation delay, jitter, tail drop and
//!   random loss.
//! - [`SenderLoop`]: feeds any [`CongestionControl`] implementation with send
//!   and ack events, honoring its window and pacing interval and firing
//!   retransmission timeouts.
//! - [`SimulationReport`]: throughput, delay and controller statistics of a run.
//!
//! ```
//! use phasecc::congestion_control::CongestionControlConfig;
//! use phasecc::simulation::{Link, LinkConfig, SenderLoop};
//!
//! let controller = CongestionControlConfig::default().with_seed(7).build();
//! let mut sim = SenderLoop::new(controller, Link::new(LinkConfig::lan().with_seed(7)));
//! let report = sim.run_for(1_000).report();
//! assert!(report.delivered > 0);
//! ```
//!
//! [`CongestionControl`]: crate::congestion_control::CongestionControl

mod link;
mod report;
mod sender;

pub use link::{Delivery, Link, LinkConfig, LinkPreset, LinkStats};
pub use report::{Sample, SimulationReport};
pub use sender::SenderLoop;
