// src/flap/mod.rs - Flap actuators and their range autotune

pub mod calibration;
pub mod servo;
pub mod stepper_flap;

pub use calibration::{
    CalibrationAction, CalibrationParams, CalibrationSession, CalibrationState, HINT_SERVO_FLAP, PulseRange,
    ValidationBounds,
};
pub use servo::{AutotuneOverrides, FlapStatus, SERVO_MIN_TIME, ServoFlap};
pub use stepper_flap::{StepperFlap, StepperFlapStatus};

/// Fan style values above 1 are on the 0..255 scale.
pub fn normalize_value(value: f64) -> f64 {
    if value > 1.0 { value / 255.0 } else { value }
}
