//! Virtual-time bottleneck link.
//!
//! One FIFO bottleneck in front of a fixed propagation delay:
//!
//! ```text
//! sender ──► [ queue | service ] ──► one-way delay ──► receiver
//!    ▲                                                     │
//!    └───────────────────── one-way delay ◄────────────────┘ (ack)
//! ```
//!
//! Datagrams arriving at a full queue are tail-dropped. Jitter is applied to
//! each propagation leg independently. The receiver clock runs at a fixed
//! offset from the sender clock.

use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Named link presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LinkPreset {
    Lan,
    #[default]
    Continental,
    Satellite,
}

impl LinkPreset {
    pub fn config(self) -> LinkConfig {
        match self {
            Self::Lan => LinkConfig::lan(),
            Self::Continental => LinkConfig::continental(),
            Self::Satellite => LinkConfig::satellite(),
        }
    }
}

/// Path parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LinkConfig {
    /// Propagation delay of each direction (ms).
    pub one_way_delay_ms: u64,
    /// Time the bottleneck spends on one datagram (ms).
    pub service_time_ms: f64,
    /// Datagrams the bottleneck queue holds, including the one in service.
    pub queue_capacity: usize,
    /// Jitter as a fraction of the one-way delay, applied per leg.
    pub jitter: f64,
    /// Random loss after the bottleneck, as a fraction (0.0 to 1.0).
    pub loss_rate: f64,
    /// Receiver clock minus sender clock (ms).
    pub receiver_clock_offset_ms: u64,
    /// Seed for jitter and loss.
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::continental()
    }
}

impl LinkConfig {
    /// 1ms each way, 10k datagrams/s, shallow queue.
    pub fn lan() -> Self {
        Self {
            one_way_delay_ms: 1,
            service_time_ms: 0.1,
            queue_capacity: 64,
            jitter: 0.0,
            loss_rate: 0.0,
            receiver_clock_offset_ms: 0,
            seed: 0,
        }
    }

    /// 25ms each way, 1k datagrams/s, ±5% jitter.
    pub fn continental() -> Self {
        Self {
            one_way_delay_ms: 25,
            service_time_ms: 1.0,
            queue_capacity: 128,
            jitter: 0.05,
            loss_rate: 0.0,
            receiver_clock_offset_ms: 0,
            seed: 0,
        }
    }

    /// 300ms each way, 250 datagrams/s, ±10% jitter, 0.5% loss.
    pub fn satellite() -> Self {
        Self {
            one_way_delay_ms: 300,
            service_time_ms: 4.0,
            queue_capacity: 256,
            jitter: 0.1,
            loss_rate: 0.005,
            receiver_clock_offset_ms: 0,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Round trip with an empty queue (ms).
    pub fn base_rtt_ms(&self) -> f64 {
        2.0 * self.one_way_delay_ms as f64 + self.service_time_ms
    }

    /// Bottleneck capacity (datagrams per second).
    pub fn capacity_per_sec(&self) -> f64 {
        1000.0 / self.service_time_ms
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.service_time_ms.is_finite() || self.service_time_ms <= 0.0 {
            return Err(ConfigError::invalid(
                "link.service-time-ms",
                "must be a positive finite number",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("link.queue-capacity", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid("link.jitter", "must be in [0, 1)"));
        }
        if !(0.0..1.0).contains(&self.loss_rate) {
            return Err(ConfigError::invalid("link.loss-rate", "must be in [0, 1)"));
        }
        Ok(())
    }
}

/// Timestamps of a datagram that made it through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Receipt at the receiver (receiver clock, ms).
    pub recv_ts: u64,
    /// Receipt of the ack at the sender (sender clock, ms).
    pub ack_ts: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinkStats {
    pub transmitted: u64,
    pub tail_dropped: u64,
    pub lost: u64,
}

/// FIFO bottleneck with propagation delay.
#[derive(Debug)]
pub struct Link {
    config: LinkConfig,
    rng: SmallRng,
    /// Departure times of datagrams still in the queue (sender clock, ms).
    departures: VecDeque<f64>,
    busy_until: f64,
    stats: LinkStats,
}

impl Link {
    pub fn new(config: LinkConfig) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            departures: VecDeque::new(),
            busy_until: 0.0,
            stats: LinkStats::default(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Change the bottleneck capacity; datagrams already queued keep their
    /// departure times.
    pub fn set_service_time_ms(&mut self, service_time_ms: f64) {
        tracing::debug!(
            from = self.config.service_time_ms,
            to = service_time_ms,
            "Bottleneck service time changed"
        );
        self.config.service_time_ms = service_time_ms.max(f64::EPSILON);
    }

    /// Datagrams queued or in service at `now`.
    pub fn queue_len(&mut self, now: u64) -> usize {
        self.drain(now as f64);
        self.departures.len()
    }

    /// Offer a datagram sent at `send_ts`.
    ///
    /// Returns `None` when the datagram is tail-dropped or lost.
    pub fn transmit(&mut self, send_ts: u64) -> Option<Delivery> {
        self.stats.transmitted += 1;
        let now = send_ts as f64;
        self.drain(now);

        if self.departures.len() >= self.config.queue_capacity {
            self.stats.tail_dropped += 1;
            tracing::trace!(send_ts, queue = self.departures.len(), "Tail drop");
            return None;
        }

        let departure = now.max(self.busy_until) + self.config.service_time_ms;
        self.busy_until = departure;
        self.departures.push_back(departure);

        if self.config.loss_rate > 0.0 && self.rng.random::<f64>() < self.config.loss_rate {
            self.stats.lost += 1;
            return None;
        }

        let forward = self.propagation();
        let backward = self.propagation();
        let recv = departure + forward;
        let ack = recv + backward;

        Some(Delivery {
            recv_ts: recv.round() as u64 + self.config.receiver_clock_offset_ms,
            ack_ts: (ack.ceil() as u64).max(send_ts + 1),
        })
    }

    fn propagation(&mut self) -> f64 {
        let delay = self.config.one_way_delay_ms as f64;
        if self.config.jitter > 0.0 {
            let jitter = self.config.jitter;
            delay * self.rng.random_range(1.0 - jitter..=1.0 + jitter)
        } else {
            delay
        }
    }

    fn drain(&mut self, now: f64) {
        while self.departures.front().is_some_and(|&d| d <= now) {
            self.departures.pop_front();
        }
    }
}
