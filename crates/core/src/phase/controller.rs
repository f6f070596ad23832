//! Phase-gated congestion controller.
//!
//! This module contains the state machine core and the public call surface
//! used by the sender loop.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::errors::ConfigError;

use super::config::{PhaseConfig, MIN_RTT_SAMPLE_MS};
use super::pacing::PacingScheduler;
use super::rtt::{RttStatistics, RttTracker};
use super::state::Phase;
use super::stats::PhaseStats;

/// Why the window was cut and the controller forced into Unstable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CutReason {
    /// Queue or RTT badly out of proportion to the baseline.
    Panic,
    /// RTT of the acked datagram exceeded the timeout baseline.
    LateAck,
}

/// RTT-driven congestion controller with four phases.
///
/// Driven by the sender loop through four calls:
/// - [`on_datagram_sent`](Self::on_datagram_sent) once per transmitted datagram;
/// - [`on_ack_received`](Self::on_ack_received) once per acknowledgment, in
///   receipt order;
/// - [`current_window`](Self::current_window): datagrams allowed outstanding;
/// - [`current_timeout_ms`](Self::current_timeout_ms): how long to wait
///   before sending again absent new acks.
///
/// ## Thread Safety
///
/// The controller takes `&mut self` on every event and has no internal
/// synchronization. A transport that sends and receives on different tasks
/// must serialize access (a mutex or a single consumer task).
///
/// ## Acknowledgment ordering
///
/// Acks are not matched against sequence numbers: timestamps are trusted at
/// face value. Duplicate or reordered acks are fed to the estimators like any
/// other ack; a non-positive apparent RTT is clamped to 1ms.
///
/// ## Example
///
/// ```
/// use phasecc::PhaseController;
///
/// let mut controller = PhaseController::new(false);
/// controller.on_datagram_sent(0, 0, false);
/// controller.on_ack_received(0, 0, 25, 50);
/// assert!(controller.current_window() > 1);
/// ```
#[derive(Debug)]
pub struct PhaseController {
    config: PhaseConfig,
    debug: bool,

    phase: Phase,
    /// Congestion window. Always `>= 1`; follows `target`.
    window: f64,
    /// Pacing target in datagrams per RTT. Always `>= 1`.
    target: f64,
    /// Value `target` reaches when the current Probe/Cooldown round completes.
    goal: f64,
    /// Per-ack increment of `target` during Probe/Cooldown.
    step: f64,
    /// Target before the current probe started.
    baseline: f64,

    /// Acks left in the current round.
    outstanding: u32,
    /// Round length fixed at phase entry.
    round_len: u32,
    /// A fresh send burst while Unstable with no round open allows one decrease.
    decrease_armed: bool,

    smoothed_rtt_ms: Option<f64>,
    probe_probability: f64,

    rtt: RttTracker,
    scheduler: PacingScheduler,
    rng: SmallRng,

    /// Sends minus acks, saturating at zero.
    in_flight: u64,
    last_acked_seq: Option<u64>,

    // statistics
    total_sends: u64,
    total_acks: u64,
    total_increases: u64,
    total_decreases: u64,
    total_timeouts: u64,
    late_acks: u64,
    panics: u64,
    probes: u64,
    successful_probes: u64,
    failed_probes: u64,
    reordered_acks: u64,
    peak_window: f64,
}

impl PhaseController {
    /// Create a controller with the default configuration.
    pub fn new(debug: bool) -> Self {
        Self::with_config(PhaseConfig::default(), debug)
    }

    /// Create a controller from a configuration that was already validated.
    pub fn with_config(config: PhaseConfig, debug: bool) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let scheduler = PacingScheduler::new(&config);
        let rtt = RttTracker::new(config.queue_history_weight);
        let probe_probability = config.base_probe_probability;

        Self {
            config,
            debug,
            phase: Phase::Unstable,
            window: 1.0,
            target: 1.0,
            goal: 1.0,
            step: 0.0,
            baseline: 1.0,
            outstanding: 0,
            round_len: 0,
            decrease_armed: false,
            smoothed_rtt_ms: None,
            probe_probability,
            rtt,
            scheduler,
            rng,
            in_flight: 0,
            last_acked_seq: None,
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

    /// Validate `config` and create a controller from it.
    pub fn try_new(config: PhaseConfig, debug: bool) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_config(config, debug))
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// A datagram was transmitted at `send_ts` (sender clock, ms).
    ///
    /// `after_timeout` marks a send triggered by the caller's retransmission
    /// timer: the window is cut by `beta` and the timeout baseline backs off,
    /// whatever the current phase.
    pub fn on_datagram_sent(&mut self, seq: u64, send_ts: u64, after_timeout: bool) {
        self.total_sends += 1;
        self.in_flight += 1;
        event!(
            self.debug,
            seq,
            send_ts,
            after_timeout,
            window = self.window,
            phase = %self.phase,
            "Datagram sent"
        );

        if after_timeout {
            self.total_timeouts += 1;
            self.timeout_cut();
        } else if self.phase == Phase::Unstable && self.outstanding == 0 {
            self.decrease_armed = true;
        }

        self.scheduler
            .on_send(send_ts, after_timeout, self.target, self.smoothed_rtt_ms);

        if after_timeout {
            tracing::debug!(
                seq,
                window = self.window,
                rto_ms = self.scheduler.rto_ms(),
                "Timeout: window cut, timeout baseline backed off"
            );
        }
    }

    /// An acknowledgment arrived.
    ///
    /// * `send_ts` - when the acked datagram was sent (sender clock)
    /// * `recv_ts` - when it was received (receiver clock)
    /// * `ack_recv_ts` - when the ack was received (sender clock)
    pub fn on_ack_received(&mut self, seq: u64, send_ts: u64, recv_ts: u64, ack_recv_ts: u64) {
        self.total_acks += 1;
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.last_acked_seq.is_some_and(|last| seq <= last) {
            self.reordered_acks += 1;
        }
        self.last_acked_seq = Some(self.last_acked_seq.map_or(seq, |last| last.max(seq)));

        let raw_rtt = ack_recv_ts as f64 - send_ts as f64;
        let rtt = if raw_rtt <= 0.0 {
            tracing::warn!(
                seq,
                send_ts,
                ack_recv_ts,
                "Non-positive RTT sample, clamping to floor"
            );
            MIN_RTT_SAMPLE_MS
        } else {
            raw_rtt
        };
        let rto_before = self.scheduler.rto_ms();

        self.rtt
            .record_sample(ack_recv_ts, rtt, self.phase.retention(&self.config));
        self.rtt.update_queue_delay(send_ts, recv_ts);

        let round_done = if self.outstanding > 0 {
            self.outstanding -= 1;
            self.outstanding == 0
        } else {
            false
        };
        let update = round_done || self.decrease_armed;

        let w = self.config.rtt_history_weight;
        let smoothed = match self.smoothed_rtt_ms {
            None => rtt,
            Some(srtt) => w * srtt + (1.0 - w) * rtt,
        };
        self.smoothed_rtt_ms = Some(smoothed);
        self.scheduler.on_rtt_sample(smoothed, rtt);

        let late = rtt > rto_before;
        let transitioned = self.run_phase_machine(rtt, late, round_done, update);

        self.scheduler.on_ack(
            ack_recv_ts,
            transitioned,
            smoothed,
            self.target,
            self.rtt.last_gap_delta_ms(),
        );

        event!(
            self.debug,
            seq,
            send_ts,
            recv_ts,
            ack_recv_ts,
            rtt_ms = rtt,
            queue_ms = self.rtt.queue_ms(),
            queue_estimate_ms = self.rtt.queue_delay_estimate_ms(),
            window = self.window,
            phase = %self.phase,
            outstanding = self.outstanding,
            timeout_ms = self.scheduler.current_timeout_ms(),
            "Ack received"
        );
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Datagrams allowed outstanding right now: `floor(window)`, never 0.
    pub fn current_window(&self) -> u32 {
        let window = if self.window.is_finite() {
            self.window.floor()
        } else {
            1.0
        };
        (window as u32).max(1)
    }

    /// Milliseconds to wait before sending again absent new acks, never 0.
    pub fn current_timeout_ms(&self) -> u32 {
        let timeout = self.scheduler.current_timeout_ms();
        event!(self.debug, timeout_ms = timeout, window = self.window, "Timeout queried");
        timeout
    }

    /// Fixed timeout for callers that run the controller window-only and
    /// want a constant retransmission timer.
    pub fn window_timeout_ms(&self) -> u32 {
        self.config.window_timeout_ms
    }

    /// Minimum, mean and spread of the retained RTT window.
    pub fn statistics(&self) -> Option<RttStatistics> {
        self.rtt.statistics()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Real-valued congestion window.
    pub fn window(&self) -> f64 {
        self.window
    }

    /// Real-valued pacing target.
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn probe_probability(&self) -> f64 {
        self.probe_probability
    }

    pub fn smoothed_rtt_ms(&self) -> Option<f64> {
        self.smoothed_rtt_ms
    }

    pub fn queue_delay_estimate_ms(&self) -> f64 {
        self.rtt.queue_delay_estimate_ms()
    }

    /// Current retransmission timeout baseline (ms).
    pub fn rto_ms(&self) -> f64 {
        self.scheduler.rto_ms()
    }

    /// Datagrams sent and not yet acked, as counted from the events.
    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    /// Snapshot of the controller for telemetry.
    pub fn stats(&self) -> PhaseStats {
        let rtt_stats = self.rtt.statistics();
        PhaseStats {
            phase: self.phase,
            mode: self.config.mode,
            window: self.window,
            target: self.target,
            outstanding: self.outstanding,
            in_flight: self.in_flight,
            smoothed_rtt_ms: self.smoothed_rtt_ms,
            min_rtt_ms: rtt_stats.map(|s| s.min),
            latest_rtt_ms: self.rtt.latest_rtt_ms(),
            queue_ms: self.rtt.queue_ms(),
            queue_delay_estimate_ms: self.rtt.queue_delay_estimate_ms(),
            probe_probability: self.probe_probability,
            timeout_ms: self.scheduler.current_timeout_ms(),
            rto_ms: self.scheduler.rto_ms(),
            pacing_interval_ms: self.scheduler.interval_ms(),
            pacing_left: self.scheduler.left(),
            next_transmission_ms: self.scheduler.next_transmission_ms(),
            total_sends: self.total_sends,
            total_acks: self.total_acks,
            total_increases: self.total_increases,
            total_decreases: self.total_decreases,
            total_timeouts: self.total_timeouts,
            late_acks: self.late_acks,
            panics: self.panics,
            probes: self.probes,
            successful_probes: self.successful_probes,
            failed_probes: self.failed_probes,
            reordered_acks: self.reordered_acks,
            peak_window: self.peak_window,
        }
    }

    // =========================================================================
    // State machine core
    // =========================================================================

    /// Run one ack through the transition rules. Returns whether a phase or
    /// round transition happened, which resets the pacing schedule.
    fn run_phase_machine(&mut self, rtt: f64, late: bool, round_done: bool, update: bool) -> bool {
        if late && self.phase != Phase::Unstable {
            self.cut(CutReason::LateAck, rtt);
            return true;
        }

        if self.phase.can_panic() && self.panic_condition(rtt) {
            self.cut(CutReason::Panic, rtt);
            return true;
        }

        match self.phase {
            Phase::Unstable => {
                if !late && self.stability_holds(rtt) {
                    self.enter_stable();
                    self.additive_increase();
                    return true;
                }
                if late {
                    self.late_acks += 1;
                }
                if update {
                    self.multiplicative_decrease();
                    self.decrease_armed = false;
                    self.open_round();
                }
                update
            }
            Phase::Stable => {
                self.additive_increase();
                if !round_done {
                    return false;
                }
                let coin: f64 = self.rng.random();
                if coin < self.probe_probability {
                    self.enter_probe();
                } else {
                    self.probe_probability =
                        (self.probe_probability * self.config.probe_probability_growth).min(1.0);
                    self.open_round();
                    event!(
                        self.debug,
                        probe_probability = self.probe_probability,
                        window = self.window,
                        "Probe declined"
                    );
                }
                true
            }
            Phase::Probe => {
                self.advance_target();
                if !round_done {
                    return false;
                }
                self.set_window(self.goal);
                self.enter_cooldown();
                true
            }
            Phase::Cooldown => {
                self.advance_target();
                if !round_done {
                    return false;
                }
                self.set_window(self.goal);
                self.judge_probe();
                true
            }
        }
    }

    /// The queue is judged drained.
    fn stability_holds(&self, rtt: f64) -> bool {
        if self.rtt.queue_ms() < self.config.stable_queue_ms {
            return true;
        }
        self.rtt
            .statistics()
            .is_some_and(|stats| rtt <= stats.min * self.config.stable_rtt_ratio)
    }

    fn panic_condition(&self, rtt: f64) -> bool {
        let queue_ms = self.rtt.queue_ms();
        let queue_spike = queue_ms >= self.config.stable_queue_ms
            && self.rtt.queue_ratio() > self.config.panic_queue_ratio;
        let rtt_spike = self
            .rtt
            .statistics()
            .is_some_and(|stats| rtt > stats.min * self.config.panic_rtt_ratio);
        queue_spike || rtt_spike
    }

    /// Judge the probe from the RTT spread once Cooldown completes.
    fn judge_probe(&mut self) {
        let success = self.rtt.statistics().is_some_and(|stats| {
            stats.spread_ratio() < self.config.spread_ratio_threshold
                || stats.coefficient_of_variation() < self.config.spread_cv_threshold
        });

        if success {
            self.successful_probes += 1;
            tracing::debug!(window = self.window, "Probe successful, climbing");
            self.enter_probe();
        } else {
            self.failed_probes += 1;
            self.set_window(self.baseline * self.config.fallback_factor);
            self.probe_probability = self.config.base_probe_probability;
            tracing::debug!(window = self.window, "Probe unsuccessful, falling back");
            self.enter_stable();
        }
    }

    fn cut(&mut self, reason: CutReason, rtt: f64) {
        let before = self.window;
        if self.phase == Phase::Probe {
            // undo the inflation of the probe in flight
            self.set_window(self.baseline);
        }
        self.multiplicative_decrease();
        match reason {
            CutReason::Panic => self.panics += 1,
            CutReason::LateAck => self.late_acks += 1,
        }
        tracing::debug!(
            ?reason,
            from = %self.phase,
            rtt_ms = rtt,
            queue_ms = self.rtt.queue_ms(),
            queue_estimate_ms = self.rtt.queue_delay_estimate_ms(),
            window_before = before,
            window_after = self.window,
            "Congestion detected, entering Unstable"
        );
        self.enter_unstable();
    }

    fn timeout_cut(&mut self) {
        let beta = self.config.beta;
        self.goal = (self.goal * beta).max(1.0);
        self.baseline = (self.baseline * beta).max(1.0);
        self.step *= beta;
        self.multiplicative_decrease();
    }

    // =========================================================================
    // Phase entry
    // =========================================================================

    fn enter_unstable(&mut self) {
        self.phase = Phase::Unstable;
        self.outstanding = 0;
        self.round_len = 0;
        self.decrease_armed = false;
        self.probe_probability = self.config.base_probe_probability;
        self.step = 0.0;
        self.goal = self.target;
        self.baseline = self.target;
    }

    fn enter_stable(&mut self) {
        self.transition(Phase::Stable);
        self.step = 0.0;
        self.goal = self.target;
        self.open_round();
    }

    fn enter_probe(&mut self) {
        self.transition(Phase::Probe);
        self.probes += 1;
        self.baseline = self.target;
        self.goal = self.target * self.config.probe_gain;
        self.open_round();
        self.step = (self.goal - self.target) / self.round_len as f64;
    }

    fn enter_cooldown(&mut self) {
        self.transition(Phase::Cooldown);
        self.goal = (self.target * self.config.cooldown_factor).max(self.baseline);
        self.open_round();
        self.step = (self.goal - self.target) / self.round_len as f64;
    }

    fn transition(&mut self, next: Phase) {
        if self.phase != next {
            tracing::debug!(from = %self.phase, to = %next, window = self.window, "Phase transition");
        }
        self.phase = next;
    }

    fn open_round(&mut self) {
        self.round_len = (self.window.ceil() as u32).max(1);
        self.outstanding = self.round_len;
    }

    // =========================================================================
    // Window arithmetic
    // =========================================================================

    fn additive_increase(&mut self) {
        self.set_window(self.window + self.config.alpha / self.window);
        self.total_increases += 1;
    }

    fn multiplicative_decrease(&mut self) {
        self.set_window(self.window * self.config.beta);
        self.total_decreases += 1;
    }

    fn advance_target(&mut self) {
        let next = self.target + self.step;
        let next = if self.step >= 0.0 {
            next.min(self.goal)
        } else {
            next.max(self.goal)
        };
        self.set_window(next);
    }

    /// Set window and target together, clamped to the floor of 1.
    fn set_window(&mut self, value: f64) {
        let value = if value.is_finite() { value.max(1.0) } else { 1.0 };
        self.window = value;
        self.target = value;
        self.peak_window = self.peak_window.max(value);
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new(false)
    }
}
