// src/motion/trajectory.rs - Private per-actuator trajectory timeline
use std::collections::VecDeque;

use crate::motion::segment::Move;

/// How long finalized segments stay queryable after the flush horizon.
pub const HISTORY_WINDOW: f64 = 30.0;

/// A committed move stamped on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectorySegment {
    pub print_time: f64,
    pub mv: Move,
}

impl TrajectorySegment {
    pub fn end_time(&self) -> f64 {
        self.print_time + self.mv.total_t
    }
}

/// Append-only, time-ordered sequence of committed segments.
///
/// Segments are `pending` until the flush horizon passes their end, then move
/// to `history` where they remain queryable for [`HISTORY_WINDOW`] seconds.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pending: VecDeque<TrajectorySegment>,
    history: VecDeque<TrajectorySegment>,
    flushed_until: f64,
    last_position: f64,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a move starting at `print_time`. Returns the segment end time.
    pub fn append(&mut self, print_time: f64, mv: Move) -> f64 {
        let print_time = match self.last_end_time() {
            Some(end) if print_time < end => {
                tracing::warn!(
                    "Trajectory append at {:.6} overlaps previous segment ending at {:.6}",
                    print_time,
                    end
                );
                end
            }
            _ => print_time,
        };
        let segment = TrajectorySegment { print_time, mv };
        self.pending.push_back(segment);
        self.last_position = mv.end_pos;
        segment.end_time()
    }

    /// Marks all segments ending at or before `flush_time` as final and
    /// reclaims history older than the history window.
    pub fn finalize(&mut self, flush_time: f64) {
        while let Some(front) = self.pending.front() {
            if front.end_time() > flush_time {
                break;
            }
            if let Some(segment) = self.pending.pop_front() {
                self.history.push_back(segment);
            }
        }
        self.flushed_until = self.flushed_until.max(flush_time);
        let horizon = flush_time - HISTORY_WINDOW;
        while let Some(front) = self.history.front() {
            if front.end_time() >= horizon || self.history.len() == 1 {
                break;
            }
            self.history.pop_front();
        }
    }

    /// Rebases the timeline at `print_time`: all segments are finalized and a
    /// zero-length marker at `position` is recorded.
    pub fn set_position(&mut self, print_time: f64, position: f64) {
        self.finalize(f64::INFINITY);
        self.history.clear();
        self.history.push_back(TrajectorySegment {
            print_time,
            mv: Move::new(position, position, 1.0, 0.0),
        });
        self.flushed_until = print_time;
        self.last_position = position;
    }

    /// Commanded position on the timeline at `print_time`.
    pub fn position_at(&self, print_time: f64) -> f64 {
        let mut position = None;
        for segment in self.history.iter().chain(self.pending.iter()) {
            if segment.print_time > print_time {
                break;
            }
            position = Some(segment.mv.position_at(print_time - segment.print_time));
        }
        match position {
            Some(pos) => pos,
            None => self
                .history
                .front()
                .or_else(|| self.pending.front())
                .map(|s| s.mv.start_pos)
                .unwrap_or(self.last_position),
        }
    }

    pub fn last_end_time(&self) -> Option<f64> {
        self.pending
            .back()
            .or_else(|| self.history.back())
            .map(|s| s.end_time())
    }

    pub fn last_position(&self) -> f64 {
        self.last_position
    }

    pub fn pending(&self) -> impl Iterator<Item = &TrajectorySegment> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn flushed_until(&self) -> f64 {
        self.flushed_until
    }
}
