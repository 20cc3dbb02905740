// src/flap/stepper_flap.rs - Flap positioned by an independent stepper
use serde::Serialize;

use crate::config::{StepperConfig, StepperFlapConfig};
use crate::error::{ConsistencyError, DrainError};
use crate::hardware::PulseGenerator;
use crate::motion::queue::Submission;
use crate::motion::scheduler::{DeferredCommand, PrimaryScheduler};
use crate::motion::stepper::IndependentStepper;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepperFlapStatus {
    pub name: String,
    pub value: f64,
    pub position: f64,
    pub energized: bool,
}

/// Maps a normalized opening onto a stepper position: `0.0` is closed and
/// `1.0` one unit of travel away, negated when the flap is inverted.
pub struct StepperFlap {
    stepper: IndependentStepper,
    invert: bool,
    start_value: f64,
    value: f64,
}

impl StepperFlap {
    pub fn new(name: impl Into<String>, config: &StepperFlapConfig, pulses: Box<dyn PulseGenerator>) -> Self {
        let motion = StepperConfig {
            velocity: config.velocity,
            accel: config.accel,
            disable_when_inactive: config.disable_when_inactive,
            disable_delay: config.disable_delay,
        };
        Self {
            stepper: IndependentStepper::new(name, &motion, pulses),
            invert: config.invert,
            start_value: config.start_value,
            value: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        self.stepper.name()
    }

    pub fn stepper(&self) -> &IndependentStepper {
        &self.stepper
    }

    pub fn on_connect(&mut self, scheduler: &mut dyn PrimaryScheduler) {
        if self.start_value != self.value {
            self.set_value(self.start_value, scheduler);
        }
    }

    pub fn set_value(&mut self, value: f64, scheduler: &mut dyn PrimaryScheduler) -> Submission {
        let value = value.clamp(0.0, 1.0);
        let target = if self.invert { -value } else { value };
        self.value = value;
        let (velocity, accel) = (self.stepper.velocity(), self.stepper.accel());
        self.stepper.move_to(target, velocity, accel, scheduler)
    }

    pub fn dispatch(
        &mut self,
        command: &DeferredCommand,
        print_time: f64,
        scheduler: &mut dyn PrimaryScheduler,
    ) -> Result<(), ConsistencyError> {
        self.stepper.dispatch(command, print_time, scheduler)
    }

    /// Rebases the stepper; the opening follows the new position.
    pub fn set_position(&mut self, position: f64) -> Result<(), DrainError> {
        self.stepper.set_position(position)?;
        let value = if self.invert { -position } else { position };
        self.value = value.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn next_cmd_time(&self) -> f64 {
        self.stepper.next_cmd_time()
    }

    pub fn update_move_time(&mut self, flush_time: f64) {
        self.stepper.update_move_time(flush_time);
    }

    pub fn status(&self) -> StepperFlapStatus {
        StepperFlapStatus {
            name: self.stepper.name().to_string(),
            value: self.value,
            position: self.stepper.commanded_position(),
            energized: self.stepper.pulses().is_enabled(),
        }
    }
}
