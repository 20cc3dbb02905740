// src/hardware/mod.rs - Driver-facing traits and the emergency shutdown primitive
pub mod shutdown;

use async_trait::async_trait;

use crate::error::SampleError;
use crate::motion::trajectory::Trajectory;

pub use shutdown::{ShutdownReason, ShutdownSignal};

/// Step pulse generation for one stepper bound to a private trajectory.
pub trait PulseGenerator {
    /// Generates pulses for `trajectory` up to `end_time`.
    fn generate_steps(&mut self, trajectory: &Trajectory, end_time: f64);
    fn commanded_position(&self) -> f64;
    fn set_position(&mut self, position: f64);
    fn motor_enable(&mut self, print_time: f64);
    fn motor_disable(&mut self, print_time: f64);
    fn is_enabled(&self) -> bool;
    /// True while generated steps have not been sent to the MCU yet.
    fn has_untransmitted_steps(&self) -> bool;
}

/// PWM output of a hobby servo.
pub trait ServoOutput {
    fn set_width(&mut self, print_time: f64, width: f64);
    fn power_off(&mut self, print_time: f64);
}

/// Analog feedback pin. Values are normalized to `0.0..=1.0`.
#[async_trait(?Send)]
pub trait FeedbackSource {
    async fn read(&mut self) -> Result<f64, SampleError>;
    /// Values outside `[min, max]` are reported as out of range.
    fn configure_range(&mut self, min: f64, max: f64);
}
