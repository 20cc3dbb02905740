// src/simulator/mod.rs - Simulated primary scheduler and actuator hardware
//!
//! The simulated rig runs on the tokio clock. With the clock paused
//! (`tokio::time::pause`) a calibration that takes minutes of machine time
//! completes instantly and deterministically.
pub mod devices;
pub mod rig;
pub mod scheduler;

pub use devices::{ServoLog, SimFeedback, SimFlapMechanism, SimPulseGenerator, SimServo, StepperLog};
pub use rig::SimRig;
pub use scheduler::SimScheduler;

/// Simulation clock: seconds elapsed since the rig was created.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    start: tokio::time::Instant,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Suspends until the clock reads at least `time`.
    pub async fn sleep_until(&self, time: f64) {
        let now = self.now();
        if time > now {
            tokio::time::sleep(tokio::time::Duration::from_secs_f64(time - now)).await;
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}
