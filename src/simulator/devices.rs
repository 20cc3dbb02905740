// src/simulator/devices.rs - Simulated step generator, servo and flap mechanism
use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SampleError;
use crate::hardware::{FeedbackSource, PulseGenerator, ServoOutput};
use crate::motion::trajectory::Trajectory;
use crate::simulator::SimClock;

/// Distance covered by one full step.
pub const STEP_DISTANCE: f64 = 0.0125;

/// Everything a simulated stepper driver was told to do.
#[derive(Debug, Clone, Default)]
pub struct StepperLog {
    pub position: f64,
    pub enabled: bool,
    /// `(print_time, enabled)` for every enable line change.
    pub enable_events: Vec<(f64, bool)>,
    pub steps: i64,
    pub generated_until: f64,
    pub untransmitted: bool,
}

/// Step generator that integrates the trajectory into whole steps.
///
/// Clones share one [`StepperLog`].
#[derive(Debug, Clone, Default)]
pub struct SimPulseGenerator {
    log: Rc<RefCell<StepperLog>>,
}

impl SimPulseGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> StepperLog {
        self.log.borrow().clone()
    }
}

impl PulseGenerator for SimPulseGenerator {
    fn generate_steps(&mut self, trajectory: &Trajectory, end_time: f64) {
        let mut log = self.log.borrow_mut();
        if end_time <= log.generated_until {
            return;
        }
        let target = trajectory.position_at(end_time);
        let from = (log.position / STEP_DISTANCE).round() as i64;
        let to = (target / STEP_DISTANCE).round() as i64;
        log.steps += (to - from).abs();
        log.position = target;
        log.generated_until = end_time;
        log.untransmitted = trajectory.last_end_time().is_some_and(|end| end > end_time);
    }

    fn commanded_position(&self) -> f64 {
        self.log.borrow().position
    }

    fn set_position(&mut self, position: f64) {
        self.log.borrow_mut().position = position;
    }

    fn motor_enable(&mut self, print_time: f64) {
        let mut log = self.log.borrow_mut();
        if !log.enabled {
            log.enabled = true;
            log.enable_events.push((print_time, true));
        }
    }

    fn motor_disable(&mut self, print_time: f64) {
        let mut log = self.log.borrow_mut();
        if log.enabled {
            log.enabled = false;
            log.enable_events.push((print_time, false));
        }
    }

    fn is_enabled(&self) -> bool {
        self.log.borrow().enabled
    }

    fn has_untransmitted_steps(&self) -> bool {
        self.log.borrow().untransmitted
    }
}

/// Pulse widths a simulated servo received.
#[derive(Debug, Clone, Default)]
pub struct ServoLog {
    /// `(print_time, width)`; a width of zero is a power off.
    pub commands: Vec<(f64, f64)>,
    pub power_offs: usize,
}

impl ServoLog {
    /// Width in effect at `time`.
    pub fn width_at(&self, time: f64) -> f64 {
        self.commands
            .iter()
            .take_while(|(t, _)| *t <= time)
            .last()
            .map_or(0.0, |(_, w)| *w)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimServo {
    log: Rc<RefCell<ServoLog>>,
}

impl SimServo {
    pub fn log(&self) -> ServoLog {
        self.log.borrow().clone()
    }
}

impl ServoOutput for SimServo {
    fn set_width(&mut self, print_time: f64, width: f64) {
        self.log.borrow_mut().commands.push((print_time, width));
    }

    fn power_off(&mut self, print_time: f64) {
        let mut log = self.log.borrow_mut();
        log.commands.push((print_time, 0.0));
        log.power_offs += 1;
    }
}

/// Physical end stops of a flap, in pulse width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimFlapMechanism {
    pub lower_stop: f64,
    pub upper_stop: f64,
    /// Feedback level while pressing against an end stop.
    pub contact_level: f64,
    pub idle_level: f64,
    pub noise: f64,
}

impl Default for SimFlapMechanism {
    fn default() -> Self {
        Self {
            lower_stop: 0.0011,
            upper_stop: 0.0019,
            contact_level: 0.6,
            idle_level: 0.02,
            noise: 0.01,
        }
    }
}

impl SimFlapMechanism {
    pub fn level(&self, width: f64) -> f64 {
        if width <= 0.0 {
            self.idle_level
        } else if width >= self.upper_stop || width <= self.lower_stop {
            self.contact_level
        } else {
            self.idle_level
        }
    }

    /// Builds a servo and the feedback pin that observes it.
    pub fn build(self, clock: SimClock, seed: u64) -> (SimServo, SimFeedback) {
        let servo = SimServo::default();
        let feedback = SimFeedback {
            mechanism: self,
            servo: servo.log.clone(),
            clock,
            rng: StdRng::seed_from_u64(seed),
            range: (0.0, 1.0),
        };
        (servo, feedback)
    }
}

/// Analog feedback pin of a simulated flap.
#[derive(Debug)]
pub struct SimFeedback {
    mechanism: SimFlapMechanism,
    servo: Rc<RefCell<ServoLog>>,
    clock: SimClock,
    rng: StdRng,
    range: (f64, f64),
}

#[async_trait(?Send)]
impl FeedbackSource for SimFeedback {
    async fn read(&mut self) -> Result<f64, SampleError> {
        let width = self.servo.borrow().width_at(self.clock.now());
        let noise = if self.mechanism.noise > 0.0 {
            self.rng.random_range(-self.mechanism.noise..self.mechanism.noise)
        } else {
            0.0
        };
        let (min, max) = self.range;
        Ok((self.mechanism.level(width) + noise).clamp(min, max))
    }

    fn configure_range(&mut self, min: f64, max: f64) {
        self.range = (min, max);
    }
}
