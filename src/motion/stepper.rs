// src/motion/stepper.rs - Independently driven stepper on its own trajectory
use serde::Serialize;

use crate::config::StepperConfig;
use crate::error::{ConsistencyError, DrainError};
use crate::hardware::PulseGenerator;
use crate::motion::ActuatorState;
use crate::motion::queue::{MotionQueueCoordinator, Submission};
use crate::motion::scheduler::{DeferredCommand, PrimaryScheduler};
use crate::motion::segment::Move;

/// Pause inserted around manual enable changes so in-flight motion finishes.
pub const DISABLE_STALL_TIME: f64 = 0.100;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepperStatus {
    pub name: String,
    pub commanded_position: f64,
    pub energized: bool,
    pub pending_batches: usize,
    pub pending_moves: usize,
    pub next_cmd_time: f64,
}

/// A stepper commanded independently of the primary kinematics.
///
/// Moves are synchronized with the primary scheduler through a
/// [`MotionQueueCoordinator`]; pulses come from the stepper's own trajectory.
pub struct IndependentStepper {
    name: String,
    coordinator: MotionQueueCoordinator,
    pulses: Box<dyn PulseGenerator>,
    commanded_pos: f64,
    velocity: f64,
    accel: f64,
    disable_when_inactive: bool,
    disable_delay: f64,
    last_active_time: f64,
}

impl IndependentStepper {
    pub fn new(name: impl Into<String>, config: &StepperConfig, pulses: Box<dyn PulseGenerator>) -> Self {
        let name = name.into();
        Self {
            coordinator: MotionQueueCoordinator::new(name.clone()),
            name,
            commanded_pos: pulses.commanded_position(),
            pulses,
            velocity: config.velocity,
            accel: config.accel,
            disable_when_inactive: config.disable_when_inactive,
            disable_delay: config.disable_delay,
            last_active_time: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn accel(&self) -> f64 {
        self.accel
    }

    pub fn commanded_position(&self) -> f64 {
        self.commanded_pos
    }

    pub fn coordinator(&self) -> &MotionQueueCoordinator {
        &self.coordinator
    }

    pub fn pulses(&self) -> &dyn PulseGenerator {
        self.pulses.as_ref()
    }

    /// Queues a move from the current commanded position to `newpos`.
    pub fn move_to(
        &mut self,
        newpos: f64,
        speed: f64,
        accel: f64,
        scheduler: &mut dyn PrimaryScheduler,
    ) -> Submission {
        let mv = Move::new(self.commanded_pos, newpos, speed, accel);
        let submission = self.coordinator.submit(mv, scheduler);
        if submission != Submission::Skipped {
            self.commanded_pos = mv.end_pos;
            tracing::debug!(
                "{}: move to {:.4} at {:.2}/s ({:?})",
                self.name,
                newpos,
                speed,
                submission
            );
        }
        submission
    }

    /// Runs a fired lookahead ticket.
    pub fn dispatch(
        &mut self,
        command: &DeferredCommand,
        print_time: f64,
        scheduler: &mut dyn PrimaryScheduler,
    ) -> Result<(), ConsistencyError> {
        match command {
            DeferredCommand::CommitBatch => {
                self.coordinator.on_lookahead(print_time, scheduler)?;
            }
            DeferredCommand::SetWidth(width) => {
                tracing::warn!("{}: ignoring pulse width {} for a stepper", self.name, width);
            }
        }
        Ok(())
    }

    /// Energizes or releases the motor at a committed time, padded by
    /// [`DISABLE_STALL_TIME`] on both sides.
    pub fn enable(&mut self, enable: bool, scheduler: &mut dyn PrimaryScheduler) {
        scheduler.dwell(DISABLE_STALL_TIME);
        let print_time = scheduler.last_move_time();
        if enable {
            self.pulses.motor_enable(print_time);
            tracing::debug!("{} has been manually enabled.", self.name);
        } else {
            self.pulses.motor_disable(print_time);
            tracing::debug!("{} has been manually disabled.", self.name);
        }
        scheduler.dwell(DISABLE_STALL_TIME);
    }

    /// Rebases the commanded position. The caller must have flushed the
    /// primary lookahead and waited for [`Self::next_cmd_time`].
    ///
    /// Committed motion is stepped out before the pulse generator is rebased.
    pub fn set_position(&mut self, new_pos: f64) -> Result<(), DrainError> {
        self.coordinator.ensure_drained()?;
        self.update_move_time(self.coordinator.next_cmd_time());
        self.coordinator.set_position(new_pos)?;
        self.pulses.set_position(new_pos);
        self.commanded_pos = new_pos;
        tracing::info!("{}: position set to {:.4}", self.name, new_pos);
        Ok(())
    }

    pub fn next_cmd_time(&self) -> f64 {
        self.coordinator.next_cmd_time()
    }

    /// Generates pulses up to `flush_time`, finalizes the trajectory and
    /// applies the idle policy.
    pub fn update_move_time(&mut self, flush_time: f64) {
        let active = self
            .coordinator
            .trajectory()
            .pending()
            .filter(|segment| segment.print_time < flush_time)
            .fold(None, |acc: Option<(f64, f64)>, segment| {
                let start = acc.map_or(segment.print_time, |(start, _)| start);
                Some((start, segment.end_time().min(flush_time)))
            });
        if let Some((first_start, last_end)) = active {
            if !self.pulses.is_enabled() {
                self.pulses.motor_enable(first_start);
            }
            self.last_active_time = self.last_active_time.max(last_end);
        }
        self.pulses.generate_steps(self.coordinator.trajectory(), flush_time);
        self.coordinator.finalize(flush_time);
        self.check_idle(flush_time);
    }

    /// De-energizes once `disable_delay` has passed since the last activity
    /// and nothing is left to transmit.
    fn check_idle(&mut self, print_time: f64) {
        if !self.disable_when_inactive || !self.pulses.is_enabled() {
            return;
        }
        if print_time < self.last_active_time + self.disable_delay {
            return;
        }
        if self.pulses.has_untransmitted_steps()
            || !self.coordinator.queue().is_empty()
            || self.coordinator.trajectory().pending_len() > 0
        {
            return;
        }
        self.pulses.motor_disable(print_time);
        tracing::debug!("{} disabled after {:.2}s of inactivity", self.name, self.disable_delay);
    }

    pub fn state(&self) -> ActuatorState {
        ActuatorState {
            commanded_value: self.commanded_pos,
            last_commit_time: self.coordinator.next_cmd_time(),
            energized: self.pulses.is_enabled(),
            power_off_deadline: if self.disable_when_inactive {
                Some(self.last_active_time + self.disable_delay)
            } else {
                None
            },
        }
    }

    pub fn status(&self) -> StepperStatus {
        StepperStatus {
            name: self.name.clone(),
            commanded_position: self.commanded_pos,
            energized: self.pulses.is_enabled(),
            pending_batches: self.coordinator.queue().len(),
            pending_moves: self.coordinator.queue().pending_moves(),
            next_cmd_time: self.coordinator.next_cmd_time(),
        }
    }
}
