// src/simulator/rig.rs - Assembles a simulated machine from a configuration
use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::config::{Config, ServoFlapConfig};
use crate::feedback::FeedbackSampler;
use crate::flap::{ServoFlap, StepperFlap};
use crate::hardware::ShutdownSignal;
use crate::host::{AuxHost, HostEvent, HostStatus};
use crate::motion::stepper::IndependentStepper;
use crate::simulator::{SimClock, SimFlapMechanism, SimPulseGenerator, SimScheduler, SimServo};

/// A host wired to simulated hardware.
pub struct SimRig {
    pub host: AuxHost<SimScheduler>,
    pub samplers: Vec<FeedbackSampler>,
    pub servos: BTreeMap<String, SimServo>,
    pub pulses: BTreeMap<String, SimPulseGenerator>,
}

/// End stops sitting just inside the configured pulse range.
pub fn mechanism_for(config: &ServoFlapConfig) -> SimFlapMechanism {
    let margin = (config.maximum_pulse_width - config.minimum_pulse_width) * 0.1;
    SimFlapMechanism {
        lower_stop: config.minimum_pulse_width + margin,
        upper_stop: config.maximum_pulse_width - margin,
        ..SimFlapMechanism::default()
    }
}

impl SimRig {
    pub fn build(config: &Config, shutdown: ShutdownSignal) -> Self {
        Self::build_with(config, shutdown, |_, flap| mechanism_for(flap))
    }

    /// Builds the rig with a custom mechanism per servo flap.
    pub fn build_with<F>(config: &Config, shutdown: ShutdownSignal, mut mechanism: F) -> Self
    where
        F: FnMut(&str, &ServoFlapConfig) -> SimFlapMechanism,
    {
        let clock = SimClock::new();
        let mut host = AuxHost::new(SimScheduler::new(clock), shutdown.clone());
        let mut samplers = Vec::new();
        let mut servos = BTreeMap::new();
        let mut pulses = BTreeMap::new();

        let mut steppers: Vec<_> = config.steppers.iter().collect();
        steppers.sort_by(|a, b| a.0.cmp(b.0));
        for (name, stepper) in steppers {
            let generator = SimPulseGenerator::new();
            pulses.insert(name.clone(), generator.clone());
            host.add_stepper(IndependentStepper::new(name.clone(), stepper, Box::new(generator)));
        }

        let mut flaps: Vec<_> = config.flaps.iter().collect();
        flaps.sort_by(|a, b| a.0.cmp(b.0));
        for (index, (name, flap)) in flaps.into_iter().enumerate() {
            let (servo, feedback) = mechanism(name, flap).build(clock, index as u64 + 1);
            servos.insert(name.clone(), servo.clone());
            host.add_flap(ServoFlap::new(name.clone(), flap.clone(), Box::new(servo)));
            samplers.push(FeedbackSampler::new(
                name.clone(),
                Box::new(feedback),
                &config.host,
                shutdown.clone(),
            ));
        }

        let mut stepper_flaps: Vec<_> = config.stepper_flaps.iter().collect();
        stepper_flaps.sort_by(|a, b| a.0.cmp(b.0));
        for (name, flap) in stepper_flaps {
            let generator = SimPulseGenerator::new();
            pulses.insert(name.clone(), generator.clone());
            host.add_stepper_flap(StepperFlap::new(name.clone(), flap, Box::new(generator)));
        }

        Self {
            host,
            samplers,
            servos,
            pulses,
        }
    }

    /// Runs the host and its samplers on the current `LocalSet` until the
    /// host stops. Returns the final status.
    pub async fn run(mut self, events: mpsc::Receiver<HostEvent>) -> HostStatus {
        let (tx, rx) = mpsc::unbounded_channel();
        for mut sampler in self.samplers.drain(..) {
            sampler.add_subscriber(tx.clone());
            sampler.spawn();
        }
        drop(tx);
        self.host.connect();
        self.host.run(rx, events).await;
        self.host.status()
    }
}
