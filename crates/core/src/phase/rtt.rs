//! RTT sample window and queue delay tracking.
//!
//! The controller judges the path from two signals:
//! - a bounded window of recent RTT samples, from which the minimum, mean and
//!   spread are computed on demand;
//! - a one-way queue occupancy estimate derived from the divergence between
//!   sender-side and receiver-side inter-ack gaps.
//!
//! ## Retention
//!
//! After every insert the oldest samples are evicted while
//! `now - oldest.arrival > K * rtt`, with `K` chosen by the current phase.
//! A windowed minimum follows slow drift of the path's base delay, and a
//! single outlier cannot poison the stability decision for long.
//!
//! ## Queue occupancy
//!
//! Between consecutive acks, `q = max(0, q + (recv_gap - send_gap))`.
//! Both gaps difference timestamps from the same clock, so a constant offset
//! between sender and receiver clocks cancels out.

use std::collections::BTreeSet;

use ordered_float::OrderedFloat;
use serde::Serialize;

use super::config::EPSILON;

/// Summary of the retained RTT samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RttStatistics {
    /// Smallest non-zero RTT in the window (ms).
    pub min: f64,
    /// Largest RTT in the window (ms).
    pub max: f64,
    /// Population mean (ms).
    pub mean: f64,
    /// Population standard deviation (ms). Zero for a single sample.
    pub stddev: f64,
    /// Number of retained samples.
    pub count: usize,
}

impl RttStatistics {
    /// Widest-to-narrowest RTT ratio.
    pub fn spread_ratio(&self) -> f64 {
        self.max / self.min.max(EPSILON)
    }

    /// Coefficient of variation, `stddev / mean`.
    pub fn coefficient_of_variation(&self) -> f64 {
        self.stddev / self.mean.max(EPSILON)
    }
}

/// Sliding RTT window plus queue delay estimator.
///
/// Samples are keyed by `(arrival_ms, rtt)`: two acks arriving in the same
/// millisecond are both kept unless their RTTs are identical too.
#[derive(Debug)]
pub(crate) struct RttTracker {
    samples: BTreeSet<(u64, OrderedFloat<f64>)>,
    latest_rtt_ms: Option<f64>,
    /// Instantaneous queue occupancy `q` (ms).
    queue_ms: f64,
    /// EWMA of `q` (ms).
    queue_delay_estimate_ms: f64,
    /// `recv_gap - send_gap` of the most recent ack pair (ms).
    last_gap_delta_ms: f64,
    last_ack_pair: Option<(u64, u64)>,
    queue_history_weight: f64,
}

impl RttTracker {
    pub(crate) fn new(queue_history_weight: f64) -> Self {
        Self {
            samples: BTreeSet::new(),
            latest_rtt_ms: None,
            queue_ms: 0.0,
            queue_delay_estimate_ms: 0.0,
            last_gap_delta_ms: 0.0,
            last_ack_pair: None,
            queue_history_weight,
        }
    }

    /// Insert a sample and evict every sample older than `retention * rtt`.
    pub(crate) fn record_sample(&mut self, now_ms: u64, rtt_ms: f64, retention: f64) {
        self.samples.insert((now_ms, OrderedFloat(rtt_ms)));
        self.latest_rtt_ms = Some(rtt_ms);

        let horizon = retention * rtt_ms;
        while let Some(&(oldest, _)) = self.samples.first() {
            if now_ms.saturating_sub(oldest) as f64 > horizon {
                self.samples.pop_first();
            } else {
                break;
            }
        }
    }

    /// Minimum, maximum, mean and standard deviation of the retained window.
    ///
    /// `None` until the first sample is recorded.
    pub(crate) fn statistics(&self) -> Option<RttStatistics> {
        let count = self.samples.len();
        if count == 0 {
            return None;
        }

        let rtts = || self.samples.iter().map(|&(_, rtt)| rtt.into_inner());
        // a literal zero sample is the "unset" sentinel and never a minimum
        let min = rtts()
            .filter(|rtt| *rtt > 0.0)
            .fold(f64::INFINITY, f64::min);
        let max = rtts().fold(0.0, f64::max);
        let mean = rtts().sum::<f64>() / count as f64;
        let variance = rtts().map(|rtt| (rtt - mean).powi(2)).sum::<f64>() / count as f64;

        Some(RttStatistics {
            min: if min.is_finite() { min } else { mean },
            max,
            mean,
            stddev: variance.sqrt(),
            count,
        })
    }

    /// Update `q` and its EWMA from the timestamps of the acknowledged datagram.
    pub(crate) fn update_queue_delay(&mut self, send_ts: u64, recv_ts: u64) {
        if let Some((last_send, last_recv)) = self.last_ack_pair {
            let send_gap = send_ts as f64 - last_send as f64;
            let recv_gap = recv_ts as f64 - last_recv as f64;
            self.last_gap_delta_ms = recv_gap - send_gap;
            self.queue_ms = (self.queue_ms + self.last_gap_delta_ms).max(0.0);
        } else {
            self.last_gap_delta_ms = 0.0;
        }

        let w = self.queue_history_weight;
        self.queue_delay_estimate_ms = w * self.queue_delay_estimate_ms + (1.0 - w) * self.queue_ms;
        self.last_ack_pair = Some((send_ts, recv_ts));
    }

    /// `q / queue_delay_estimate`, guarded against a zero estimate.
    pub(crate) fn queue_ratio(&self) -> f64 {
        self.queue_ms / self.queue_delay_estimate_ms.max(EPSILON)
    }

    pub(crate) fn queue_ms(&self) -> f64 {
        self.queue_ms
    }

    pub(crate) fn queue_delay_estimate_ms(&self) -> f64 {
        self.queue_delay_estimate_ms
    }

    pub(crate) fn last_gap_delta_ms(&self) -> f64 {
        self.last_gap_delta_ms
    }

    pub(crate) fn latest_rtt_ms(&self) -> Option<f64> {
        self.latest_rtt_ms
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
