//! Controller phase state machine.
//!
//! The controller's belief about the path and its current strategy.

use serde::Serialize;

use super::config::PhaseConfig;

/// Phase of the feedback controller.
///
/// ## State Transitions
///
/// ```text
///                 ┌──────────────┐
///   start ───────►│   Unstable   │◄───────────── panic / late ack
///                 └──────┬───────┘   (from Stable, Probe or Cooldown;
///                        │            panic only from Stable or Probe)
///                        │ queue drained
///                        ▼
///                 ┌──────────────┐  round end, coin < p
///        ┌───────►│    Stable    │───────────────────┐
///        │        └──────────────┘                   ▼
///        │  probe unsuccessful              ┌──────────────┐
///        │                                  │    Probe     │◄──┐
///        │                                  └──────┬───────┘   │
///        │                                         │ round end │ probe
///        │        ┌──────────────┐                 │           │ successful
///        └────────│   Cooldown   │◄────────────────┘           │
///                 └──────┬───────┘─────────────────────────────┘
/// ```
///
/// Halving applies only while Unstable; timeouts reduce the window from any
/// phase without changing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u8)]
pub enum Phase {
    /// Congestion suspected: no growth, at most one decrease per round.
    #[default]
    Unstable = 0,
    /// Queue believed shallow: additive increase, probe coin flip per round.
    Stable = 1,
    /// Target inflated over one round to test for spare capacity.
    Probe = 2,
    /// Target relaxed toward the pre-probe baseline, then judged.
    Cooldown = 3,
}

impl Phase {
    /// Sample retention multiplier `K` for this phase.
    ///
    /// Probing phases keep baseline history longer; Unstable forgets
    /// congested-state samples quickly.
    pub(crate) fn retention(self, config: &PhaseConfig) -> f64 {
        match self {
            Self::Unstable => config.retention_unstable,
            Self::Stable => config.retention_stable,
            Self::Probe | Self::Cooldown => config.retention_probing,
        }
    }

    /// Whether the panic escape is evaluated in this phase.
    pub(crate) fn can_panic(self) -> bool {
        matches!(self, Self::Stable | Self::Probe)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_values() {
        assert_eq!(Phase::Unstable as u8, 0);
        assert_eq!(Phase::Stable as u8, 1);
        assert_eq!(Phase::Probe as u8, 2);
        assert_eq!(Phase::Cooldown as u8, 3);
        assert_eq!(Phase::default(), Phase::Unstable);
    }

    #[test]
    fn test_retention_widens_while_probing() {
        let config = PhaseConfig::default();
        assert!(Phase::Unstable.retention(&config) < Phase::Stable.retention(&config));
        assert!(Phase::Stable.retention(&config) < Phase::Probe.retention(&config));
        assert_eq!(
            Phase::Probe.retention(&config),
            Phase::Cooldown.retention(&config)
        );
    }

    #[test]
    fn test_panic_not_evaluated_while_draining() {
        assert!(!Phase::Unstable.can_panic());
        assert!(!Phase::Cooldown.can_panic());
        assert!(Phase::Stable.can_panic());
        assert!(Phase::Probe.can_panic());
    }
}
