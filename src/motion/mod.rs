// src/motion/mod.rs - Auxiliary actuator motion: segments, queueing, trajectories

pub mod queue;
pub mod scheduler;
pub mod segment;
pub mod stepper;
pub mod trajectory;

use serde::Serialize;

pub use queue::{MotionQueueCoordinator, PendingQueue, Submission};
pub use scheduler::{
    ActuatorId, BusyStatus, DeferredCommand, FiredCallback, LookaheadTicket, PrimaryScheduler, Registration,
};
pub use segment::{Move, calc_move_time};
pub use stepper::IndependentStepper;
pub use trajectory::Trajectory;

/// Commanded state common to every auxiliary actuator.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct ActuatorState {
    /// Position for steppers, pulse width for servos.
    pub commanded_value: f64,
    pub last_commit_time: f64,
    pub energized: bool,
    pub power_off_deadline: Option<f64>,
}
