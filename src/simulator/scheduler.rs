// src/simulator/scheduler.rs - Toolhead model with a lookahead window
use std::collections::VecDeque;

use async_trait::async_trait;

use crate::motion::scheduler::{BusyStatus, FiredCallback, LookaheadTicket, PrimaryScheduler, Registration};
use crate::simulator::SimClock;

/// Lookahead is committed once its oldest move has waited this long.
pub const LOOKAHEAD_FLUSH_TIME: f64 = 0.250;
/// Lead of the print time over the clock when motion restarts from idle.
pub const BUFFER_TIME_START: f64 = 0.250;
const KIN_FLUSH_DELAY: f64 = 0.001;

#[derive(Debug, Clone, Default)]
struct PrimaryMove {
    duration: f64,
    callbacks: Vec<LookaheadTicket>,
}

/// Primary scheduler whose lookahead holds opaque timed moves.
///
/// Callbacks attach to the last queued move and fire with that move's end
/// time when the lookahead is committed.
#[derive(Debug)]
pub struct SimScheduler {
    clock: SimClock,
    print_time: f64,
    lookahead: VecDeque<PrimaryMove>,
    lookahead_since: f64,
    queued_moves: u64,
    outbox: Vec<FiredCallback>,
    last_kin_time: f64,
    total_dwell: f64,
}

impl SimScheduler {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            print_time: 0.0,
            lookahead: VecDeque::new(),
            lookahead_since: 0.0,
            queued_moves: 0,
            outbox: Vec::new(),
            last_kin_time: 0.0,
            total_dwell: 0.0,
        }
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    /// Queues a primary move of `duration` seconds into lookahead.
    pub fn queue_move(&mut self, duration: f64) {
        if self.lookahead.is_empty() {
            self.lookahead_since = self.clock.now();
        }
        self.lookahead.push_back(PrimaryMove {
            duration,
            callbacks: Vec::new(),
        });
        self.queued_moves += 1;
    }

    pub fn print_time(&self) -> f64 {
        self.print_time
    }

    pub fn lookahead_len(&self) -> usize {
        self.lookahead.len()
    }

    pub fn total_dwell(&self) -> f64 {
        self.total_dwell
    }

    pub fn last_kin_time(&self) -> f64 {
        self.last_kin_time
    }

    fn commit(&mut self) {
        let min_print_time = self.clock.now() + BUFFER_TIME_START;
        if self.print_time < min_print_time {
            self.print_time = min_print_time;
        }
        while let Some(mv) = self.lookahead.pop_front() {
            self.print_time += mv.duration;
            let print_time = self.print_time;
            self.outbox.extend(
                mv.callbacks
                    .into_iter()
                    .map(|ticket| FiredCallback { ticket, print_time }),
            );
        }
    }

    fn flush_expired(&mut self) {
        if !self.lookahead.is_empty() && self.clock.now() - self.lookahead_since >= LOOKAHEAD_FLUSH_TIME {
            self.commit();
        }
    }
}

#[async_trait(?Send)]
impl PrimaryScheduler for SimScheduler {
    fn last_move_time(&mut self) -> f64 {
        self.commit();
        self.print_time
    }

    fn dwell(&mut self, delay: f64) {
        self.commit();
        self.print_time += delay.max(0.0);
        self.total_dwell += delay.max(0.0);
    }

    fn check_busy(&self, eventtime: f64) -> BusyStatus {
        BusyStatus {
            print_time: self.print_time,
            estimated_print_time: eventtime,
            lookahead_empty: self.lookahead.is_empty(),
        }
    }

    fn queued_move_count(&self) -> u64 {
        self.queued_moves
    }

    fn register_lookahead_callback(&mut self, ticket: LookaheadTicket) -> Registration {
        match self.lookahead.back_mut() {
            Some(last) => {
                last.callbacks.push(ticket);
                Registration::Deferred
            }
            None => Registration::Immediate {
                print_time: self.last_move_time(),
            },
        }
    }

    fn flush_lookahead(&mut self) {
        if !self.lookahead.is_empty() {
            self.commit();
        }
    }

    fn take_fired(&mut self) -> Vec<FiredCallback> {
        self.flush_expired();
        std::mem::take(&mut self.outbox)
    }

    fn note_kinematic_activity(&mut self, print_time: f64) {
        self.last_kin_time = self.last_kin_time.max(print_time);
    }

    fn kin_flush_delay(&self) -> f64 {
        KIN_FLUSH_DELAY
    }

    fn monotonic(&self) -> f64 {
        self.clock.now()
    }

    async fn wait_print_time(&mut self, print_time: f64) {
        self.clock.sleep_until(print_time).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::scheduler::DeferredCommand;

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_fire_at_move_end() {
        let mut sched = SimScheduler::new(SimClock::new());
        let immediate = sched.register_lookahead_callback(LookaheadTicket::new("a", DeferredCommand::SetWidth(0.0015)));
        assert!(matches!(immediate, Registration::Immediate { .. }));

        let start = sched.print_time();
        sched.queue_move(1.0);
        let deferred = sched.register_lookahead_callback(LookaheadTicket::new("a", DeferredCommand::CommitBatch));
        assert_eq!(deferred, Registration::Deferred);
        sched.queue_move(0.5);
        assert_eq!(sched.queued_move_count(), 2);
        assert!(!sched.check_busy(0.0).lookahead_empty);

        sched.flush_lookahead();
        let fired = sched.take_fired();
        assert_eq!(fired.len(), 1);
        assert!((fired[0].print_time - (start + 1.0)).abs() < 1e-9);
        assert!((sched.print_time() - (start + 1.5)).abs() < 1e-9);
        assert!(sched.check_busy(0.0).lookahead_empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_advances_print_time() {
        let mut sched = SimScheduler::new(SimClock::new());
        let before = sched.last_move_time();
        sched.dwell(0.5);
        assert!((sched.last_move_time() - before - 0.5).abs() < 1e-9);
        assert!((sched.total_dwell() - 0.5).abs() < 1e-12);
    }
}
