//! Event-driven sender loop over a simulated link.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};

use crate::congestion_control::CongestionControl;

use super::link::Link;
use super::report::{mean_and_p95, Sample, SimulationReport};

const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingAck {
    ack_ts: u64,
    seq: u64,
    send_ts: u64,
    recv_ts: u64,
}

/// Drives a congestion controller against a [`Link`] in 1ms virtual ticks.
///
/// Each tick, in order:
/// 1. scheduled capacity changes are applied;
/// 2. acks due at this tick are fed to the controller;
/// 3. once the oldest datagram in flight is older than the retransmission
///    timeout, every datagram that old is declared lost and one datagram is
///    sent with `after_timeout` set. At most one timeout fires per
///    retransmission timeout;
/// 4. new datagrams are sent while fewer than `current_window()` are in
///    flight, spaced by `current_timeout_ms()` for paced controllers.
#[derive(Debug)]
pub struct SenderLoop<C: CongestionControl> {
    controller: C,
    link: Link,
    now_ms: u64,
    next_seq: u64,
    /// seq → send timestamp
    in_flight: BTreeMap<u64, u64>,
    acks: BinaryHeap<Reverse<PendingAck>>,
    next_send_at: u64,
    last_timeout_ms: Option<u64>,
    capacity_changes: VecDeque<(u64, f64)>,
    sample_interval_ms: u64,

    sent: u64,
    delivered: u64,
    dropped: u64,
    timeouts: u64,
    rtts: Vec<f64>,
    samples: Vec<Sample>,
}

impl<C: CongestionControl> SenderLoop<C> {
    pub fn new(controller: C, link: Link) -> Self {
        Self {
            controller,
            link,
            now_ms: 0,
            next_seq: 0,
            in_flight: BTreeMap::new(),
            acks: BinaryHeap::new(),
            next_send_at: 0,
            last_timeout_ms: None,
            capacity_changes: VecDeque::new(),
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            sent: 0,
            delivered: 0,
            dropped: 0,
            timeouts: 0,
            rtts: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn with_sample_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sample_interval_ms = interval_ms.max(1);
        self
    }

    /// Change the bottleneck service time at `at_ms`.
    pub fn schedule_service_time(&mut self, at_ms: u64, service_time_ms: f64) {
        let index = self.capacity_changes.partition_point(|&(t, _)| t <= at_ms);
        self.capacity_changes.insert(index, (at_ms, service_time_ms));
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run `duration_ms` ticks from the current time.
    pub fn run_for(&mut self, duration_ms: u64) -> &mut Self {
        let end = self.now_ms + duration_ms;
        while self.now_ms < end {
            self.tick();
            self.now_ms += 1;
        }
        self
    }

    /// Run until `condition` holds or `max_ms` ticks pass.
    ///
    /// # Returns
    /// `Ok(elapsed)` if the condition was met, `Err(max_ms)` otherwise.
    pub fn run_until<F>(&mut self, condition: F, max_ms: u64) -> Result<u64, u64>
    where
        F: Fn(&C) -> bool,
    {
        for elapsed in 1..=max_ms {
            self.tick();
            self.now_ms += 1;
            if condition(&self.controller) {
                return Ok(elapsed);
            }
        }
        Err(max_ms)
    }

    fn tick(&mut self) {
        let now = self.now_ms;

        while self.capacity_changes.front().is_some_and(|&(t, _)| t <= now) {
            if let Some((_, service_time_ms)) = self.capacity_changes.pop_front() {
                self.link.set_service_time_ms(service_time_ms);
            }
        }

        self.deliver_acks(now);
        self.check_timeout(now);

        let paced = self.controller.is_paced();
        while self.in_flight.len() < self.controller.current_window() as usize {
            if paced && now < self.next_send_at {
                break;
            }
            self.send(now, false);
            if paced {
                self.next_send_at = now + u64::from(self.controller.current_timeout_ms());
            }
        }

        if now % self.sample_interval_ms == 0 {
            let queue_len = self.link.queue_len(now);
            self.samples.push(Sample {
                time_ms: now,
                window: self.controller.current_window(),
                timeout_ms: self.controller.current_timeout_ms(),
                in_flight: self.in_flight.len(),
                queue_len,
            });
        }
    }

    fn deliver_acks(&mut self, now: u64) {
        while self.acks.peek().is_some_and(|Reverse(ack)| ack.ack_ts <= now) {
            let Some(Reverse(ack)) = self.acks.pop() else {
                break;
            };
            self.in_flight.remove(&ack.seq);
            self.controller
                .on_ack_received(ack.seq, ack.send_ts, ack.recv_ts, ack.ack_ts);
            self.delivered += 1;
            self.rtts.push((ack.ack_ts - ack.send_ts) as f64);
            self.next_send_at = now + u64::from(self.controller.current_timeout_ms());
        }
    }

    fn check_timeout(&mut self, now: u64) {
        let Some((_, &oldest)) = self.in_flight.first_key_value() else {
            return;
        };
        let rto = u64::from(self.controller.retransmission_timeout_ms());
        if now.saturating_sub(oldest) < rto {
            return;
        }
        if self
            .last_timeout_ms
            .is_some_and(|last| now.saturating_sub(last) < rto)
        {
            return;
        }

        let before = self.in_flight.len();
        self.in_flight.retain(|_, send_ts| now.saturating_sub(*send_ts) < rto);

        self.timeouts += 1;
        tracing::debug!(
            now,
            rto_ms = rto,
            lost = before - self.in_flight.len(),
            "Retransmission timeout"
        );
        self.send(now, true);
        self.last_timeout_ms = Some(now);
        self.next_send_at = now + u64::from(self.controller.current_timeout_ms());
    }

    fn send(&mut self, now: u64, after_timeout: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sent += 1;
        self.controller.on_datagram_sent(seq, now, after_timeout);
        self.in_flight.insert(seq, now);

        match self.link.transmit(now) {
            Some(delivery) => self.acks.push(Reverse(PendingAck {
                ack_ts: delivery.ack_ts,
                seq,
                send_ts: now,
                recv_ts: delivery.recv_ts,
            })),
            None => self.dropped += 1,
        }
    }

    /// Summarize the run so far.
    pub fn report(&self) -> SimulationReport {
        let (mean_rtt_ms, p95_rtt_ms) = mean_and_p95(&self.rtts);
        let throughput = if self.now_ms == 0 {
            0.0
        } else {
            self.delivered as f64 * 1000.0 / self.now_ms as f64
        };

        SimulationReport {
            algorithm: self.controller.algorithm(),
            sent: self.sent,
            delivered: self.delivered,
            dropped: self.dropped,
            timeouts: self.timeouts,
            duration_ms: self.now_ms,
            throughput,
            mean_rtt_ms,
            p95_rtt_ms,
            final_window: self.controller.current_window(),
            controller: self.controller.stats(),
            samples: self.samples.clone(),
        }
    }

    pub fn into_controller(self) -> C {
        self.controller
    }
}
