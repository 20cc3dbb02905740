// src/motion/queue.rs - Synchronizes actuator moves with the primary scheduler's commit points
//!
//! Moves submitted while the primary lookahead is busy are buffered in a
//! [`PendingQueue`] and committed to the actuator's private [`Trajectory`] once
//! the scheduler fires the batch's lookahead ticket. When the primary
//! scheduler is idle the move is committed straight away.

use std::ops::Range;

use crate::error::ConsistencyError;
use crate::motion::scheduler::{ActuatorId, DeferredCommand, LookaheadTicket, PrimaryScheduler, Registration};
use crate::motion::segment::Move;
use crate::motion::trajectory::Trajectory;

/// A batch of moves, addressed as a range of the move arena.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BatchRecord {
    first: usize,
    len: usize,
    /// Primary move count when the batch was opened.
    generation: u64,
}

/// FIFO of move batches backed by a single move arena and a head cursor.
///
/// Only the tail batch may be open. The arena is reclaimed whenever the
/// queue runs empty.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    moves: Vec<Move>,
    batches: Vec<BatchRecord>,
    head: usize,
    open: bool,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.batches.len()
    }

    /// Number of batches not yet drained.
    pub fn len(&self) -> usize {
        self.batches.len() - self.head
    }

    /// Number of moves not yet drained.
    pub fn pending_moves(&self) -> usize {
        self.batches[self.head..].iter().map(|b| b.len).sum()
    }

    pub fn has_open_batch(&self) -> bool {
        self.open
    }

    fn open_generation(&self) -> Option<u64> {
        if self.open {
            self.batches.last().map(|b| b.generation)
        } else {
            None
        }
    }

    fn open_batch(&mut self, generation: u64) {
        self.open = true;
        self.batches.push(BatchRecord {
            first: self.moves.len(),
            len: 0,
            generation,
        });
    }

    fn close_open(&mut self) {
        self.open = false;
    }

    /// Appends to the open batch. Returns `false` when no batch is open.
    fn push(&mut self, mv: Move) -> bool {
        if !self.open {
            return false;
        }
        match self.batches.last_mut() {
            Some(tail) => {
                tail.len += 1;
                self.moves.push(mv);
                true
            }
            None => false,
        }
    }

    /// Removes the head batch and returns its arena range. The moves stay
    /// readable through [`PendingQueue::get`] until the next reclaim.
    fn pop_head(&mut self) -> Option<Range<usize>> {
        if self.is_empty() {
            return None;
        }
        let batch = self.batches[self.head];
        self.head += 1;
        if self.is_empty() {
            self.open = false;
        }
        Some(batch.first..batch.first + batch.len)
    }

    fn get(&self, index: usize) -> Option<Move> {
        self.moves.get(index).copied()
    }

    fn reclaim(&mut self) {
        if self.is_empty() {
            self.moves.clear();
            self.batches.clear();
            self.head = 0;
            self.open = false;
        }
    }

    /// Structural invariants: batches tile the arena contiguously and an
    /// open batch is always the tail.
    pub fn check_invariants(&self) -> bool {
        let mut expected = self.batches.first().map(|b| b.first).unwrap_or(0);
        for batch in &self.batches {
            if batch.first != expected {
                return false;
            }
            expected += batch.len;
        }
        if expected != self.moves.len() || self.head > self.batches.len() {
            return false;
        }
        !self.open || !self.is_empty()
    }
}

/// What `submit` did with a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Submission {
    /// Zero-duration move, nothing scheduled.
    Skipped,
    /// Written to the trajectory at the given time.
    Committed { print_time: f64 },
    /// Added to the batch already awaiting its callback.
    Appended,
    /// Opened a new batch and registered its callback.
    Registered,
}

#[derive(Debug, Clone)]
pub struct MotionQueueCoordinator {
    actuator: ActuatorId,
    queue: PendingQueue,
    trajectory: Trajectory,
    next_cmd_time: f64,
}

impl MotionQueueCoordinator {
    pub fn new(actuator: impl Into<ActuatorId>) -> Self {
        Self {
            actuator: actuator.into(),
            queue: PendingQueue::new(),
            trajectory: Trajectory::new(),
            next_cmd_time: 0.0,
        }
    }

    pub fn submit(&mut self, mv: Move, scheduler: &mut dyn PrimaryScheduler) -> Submission {
        if mv.is_empty() {
            return Submission::Skipped;
        }
        let busy = scheduler.check_busy(scheduler.monotonic());
        if busy.lookahead_empty {
            if !self.queue.is_empty() {
                let err = ConsistencyError::PendingWhileIdle {
                    actuator: self.actuator.clone(),
                };
                tracing::error!("{}", err);
            }
            self.sync_print_time(scheduler);
            let print_time = self.process_move(mv, self.next_cmd_time);
            self.after_commit(scheduler);
            return Submission::Committed { print_time };
        }

        let generation = scheduler.queued_move_count();
        if self.queue.open_generation() == Some(generation) {
            if self.queue.push(mv) {
                return Submission::Appended;
            }
            let err = ConsistencyError::NoOpenBatch {
                actuator: self.actuator.clone(),
            };
            tracing::error!("{}", err);
        }

        // The primary scheduler accepted new moves since the open batch was
        // registered, so later moves synchronize with the later commit point.
        self.queue.close_open();
        self.queue.open_batch(generation);
        self.queue.push(mv);
        let ticket = LookaheadTicket::new(self.actuator.clone(), DeferredCommand::CommitBatch);
        match scheduler.register_lookahead_callback(ticket) {
            Registration::Deferred => Submission::Registered,
            Registration::Immediate { print_time } => {
                // Nothing to wait for; the commit point is now.
                let stamp = print_time.max(self.next_cmd_time);
                if let Err(err) = self.on_lookahead(print_time, scheduler) {
                    tracing::error!("{}", err);
                }
                Submission::Committed { print_time: stamp }
            }
        }
    }

    /// Drains the head batch into the trajectory. Returns the number of
    /// committed moves.
    pub fn on_lookahead(
        &mut self,
        print_time: f64,
        scheduler: &mut dyn PrimaryScheduler,
    ) -> Result<usize, ConsistencyError> {
        let Some(batch) = self.queue.pop_head() else {
            return Err(ConsistencyError::EmptyQueueOnCommit {
                actuator: self.actuator.clone(),
            });
        };
        let count = batch.len();
        for index in batch {
            if let Some(mv) = self.queue.get(index) {
                self.process_move(mv, print_time);
            }
        }
        self.queue.reclaim();
        self.after_commit(scheduler);
        tracing::debug!(
            "{}: committed {} buffered moves at {:.6}",
            self.actuator,
            count,
            print_time
        );
        Ok(count)
    }

    /// Makes the private clock and the primary timeline agree: the primary
    /// scheduler waits for pending actuator motion, otherwise the private
    /// clock catches up.
    pub fn sync_print_time(&mut self, scheduler: &mut dyn PrimaryScheduler) {
        let print_time = scheduler.last_move_time();
        if self.next_cmd_time > print_time {
            scheduler.dwell(self.next_cmd_time - print_time);
        } else {
            self.next_cmd_time = print_time;
        }
    }

    fn process_move(&mut self, mv: Move, print_time: f64) -> f64 {
        let print_time = print_time.max(self.next_cmd_time);
        self.next_cmd_time = self.trajectory.append(print_time, mv);
        print_time
    }

    /// With nothing left in the primary lookahead, the primary timeline
    /// must not run ahead of the moves just committed.
    fn after_commit(&mut self, scheduler: &mut dyn PrimaryScheduler) {
        let busy = scheduler.check_busy(scheduler.monotonic());
        if busy.lookahead_empty {
            scheduler.note_kinematic_activity(self.next_cmd_time);
            self.sync_print_time(scheduler);
        }
    }

    /// Rebases the trajectory. The pending queue must already be drained.
    /// Fails while any batch is still waiting for the primary lookahead.
    pub fn ensure_drained(&self) -> Result<(), crate::error::DrainError> {
        if !self.queue.is_empty() {
            return Err(crate::error::DrainError {
                actuator: self.actuator.clone(),
                pending: self.queue.len(),
            });
        }
        Ok(())
    }

    pub fn set_position(&mut self, position: f64) -> Result<(), crate::error::DrainError> {
        self.ensure_drained()?;
        self.trajectory.set_position(self.next_cmd_time, position);
        Ok(())
    }

    pub fn finalize(&mut self, flush_time: f64) {
        self.trajectory.finalize(flush_time);
    }

    pub fn actuator(&self) -> &str {
        &self.actuator
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn next_cmd_time(&self) -> f64 {
        self.next_cmd_time
    }
}
