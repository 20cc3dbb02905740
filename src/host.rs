// src/host.rs - Owns every auxiliary actuator and routes events to them
//!
//! The host is the single task that mutates actuator and calibration state.
//! Feedback samples arrive on one channel, console commands on another, and
//! fired lookahead tickets are pulled from the scheduler and dispatched
//! through the actuator table.
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::command::AuxCommand;
use crate::error::{CommandError, ConsistencyError, HostError};
use crate::feedback::FeedbackSample;
use crate::flap::{FlapStatus, HINT_SERVO_FLAP, ServoFlap, StepperFlap, StepperFlapStatus, normalize_value};
use crate::hardware::ShutdownSignal;
use crate::motion::scheduler::{ActuatorId, FiredCallback, PrimaryScheduler};
use crate::motion::stepper::{IndependentStepper, StepperStatus};

/// Interval of the flush timer that generates pulses.
pub const FLUSH_INTERVAL: f64 = 0.050;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActuatorKind {
    Stepper,
    ServoFlap,
    StepperFlap,
}

/// Requests handled by the host task.
#[derive(Debug)]
pub enum HostEvent {
    Command {
        line: String,
        respond_to: oneshot::Sender<Result<String, String>>,
    },
    Stop,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostStatus {
    pub steppers: Vec<StepperStatus>,
    pub flaps: Vec<FlapStatus>,
    pub stepper_flaps: Vec<StepperFlapStatus>,
    pub shutdown: Option<String>,
}

pub struct AuxHost<S: PrimaryScheduler> {
    scheduler: S,
    table: HashMap<ActuatorId, ActuatorKind>,
    steppers: BTreeMap<String, IndependentStepper>,
    flaps: BTreeMap<String, ServoFlap>,
    stepper_flaps: BTreeMap<String, StepperFlap>,
    shutdown: ShutdownSignal,
}

impl<S: PrimaryScheduler> AuxHost<S> {
    pub fn new(scheduler: S, shutdown: ShutdownSignal) -> Self {
        Self {
            scheduler,
            table: HashMap::new(),
            steppers: BTreeMap::new(),
            flaps: BTreeMap::new(),
            stepper_flaps: BTreeMap::new(),
            shutdown,
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn add_stepper(&mut self, stepper: IndependentStepper) {
        self.table.insert(stepper.name().to_string(), ActuatorKind::Stepper);
        self.steppers.insert(stepper.name().to_string(), stepper);
    }

    pub fn add_flap(&mut self, flap: ServoFlap) {
        self.table.insert(flap.name().to_string(), ActuatorKind::ServoFlap);
        self.flaps.insert(flap.name().to_string(), flap);
    }

    pub fn add_stepper_flap(&mut self, flap: StepperFlap) {
        self.table.insert(flap.name().to_string(), ActuatorKind::StepperFlap);
        self.stepper_flaps.insert(flap.name().to_string(), flap);
    }

    pub fn stepper(&self, name: &str) -> Option<&IndependentStepper> {
        self.steppers.get(name)
    }

    pub fn flap(&self, name: &str) -> Option<&ServoFlap> {
        self.flaps.get(name)
    }

    pub fn stepper_flap(&self, name: &str) -> Option<&StepperFlap> {
        self.stepper_flaps.get(name)
    }

    /// Moves every actuator to its start state.
    pub fn connect(&mut self) {
        for flap in self.flaps.values_mut() {
            flap.on_connect(&mut self.scheduler);
        }
        for flap in self.stepper_flaps.values_mut() {
            flap.on_connect(&mut self.scheduler);
        }
        self.pump_fired();
        tracing::info!(
            "Auxiliary host ready: {} steppers, {} flaps, {} stepper flaps",
            self.steppers.len(),
            self.flaps.len(),
            self.stepper_flaps.len()
        );
    }

    /// Dispatches fired lookahead tickets until none are left.
    pub fn pump_fired(&mut self) -> usize {
        let mut dispatched = 0;
        loop {
            let fired = self.scheduler.take_fired();
            if fired.is_empty() {
                return dispatched;
            }
            for callback in fired {
                if let Err(err) = self.dispatch(&callback) {
                    tracing::error!("{}", err);
                }
                dispatched += 1;
            }
        }
    }

    fn dispatch(&mut self, callback: &FiredCallback) -> Result<(), ConsistencyError> {
        let FiredCallback { ticket, print_time } = callback;
        let unknown = || ConsistencyError::UnknownActuator {
            actuator: ticket.actuator.clone(),
        };
        match self.table.get(&ticket.actuator).copied() {
            Some(ActuatorKind::Stepper) => self
                .steppers
                .get_mut(&ticket.actuator)
                .ok_or_else(unknown)?
                .dispatch(&ticket.command, *print_time, &mut self.scheduler),
            Some(ActuatorKind::StepperFlap) => self
                .stepper_flaps
                .get_mut(&ticket.actuator)
                .ok_or_else(unknown)?
                .dispatch(&ticket.command, *print_time, &mut self.scheduler),
            Some(ActuatorKind::ServoFlap) => {
                self.flaps
                    .get_mut(&ticket.actuator)
                    .ok_or_else(unknown)?
                    .dispatch(&ticket.command, *print_time);
                Ok(())
            }
            None => Err(unknown()),
        }
    }

    fn estimated_print_time(&self) -> f64 {
        self.scheduler
            .check_busy(self.scheduler.monotonic())
            .estimated_print_time
    }

    /// Feeds one sample to its flap. Ignored once shut down.
    pub fn handle_sample(&mut self, sample: &FeedbackSample) {
        if self.shutdown.is_shutdown() {
            return;
        }
        let now = self.estimated_print_time();
        let Some(flap) = self.flaps.get_mut(&sample.flap) else {
            tracing::warn!("Feedback sample for unknown flap {}", sample.flap);
            return;
        };
        if let Err(err) = flap.handle_sample(sample.value, now, &mut self.scheduler) {
            self.shutdown.invoke_shutdown(format!("{}\n{}", err, HINT_SERVO_FLAP));
        }
        self.pump_fired();
    }

    /// Generates pulses up to `flush_time` for every stepper.
    pub fn update_move_time(&mut self, flush_time: f64) {
        for stepper in self.steppers.values_mut() {
            stepper.update_move_time(flush_time);
        }
        for flap in self.stepper_flaps.values_mut() {
            flap.update_move_time(flush_time);
        }
    }

    /// Periodic housekeeping: dispatch fired tickets, then flush pulses.
    pub fn flush(&mut self) {
        self.pump_fired();
        let flush_time = self.estimated_print_time() - self.scheduler.kin_flush_delay();
        self.update_move_time(flush_time);
    }

    pub fn move_stepper(
        &mut self,
        name: &str,
        position: f64,
        speed: Option<f64>,
        accel: Option<f64>,
    ) -> Result<(), HostError> {
        self.check_running()?;
        let stepper = self.steppers.get_mut(name).ok_or_else(|| CommandError::UnknownTarget {
            kind: "stepper",
            name: name.to_string(),
        })?;
        let speed = speed.unwrap_or(stepper.velocity());
        let accel = accel.unwrap_or(stepper.accel());
        stepper.move_to(position, speed, accel, &mut self.scheduler);
        self.pump_fired();
        Ok(())
    }

    pub fn enable_stepper(&mut self, name: &str, enable: bool) -> Result<(), HostError> {
        self.check_running()?;
        if !self.steppers.contains_key(name) {
            return Err(CommandError::UnknownTarget {
                kind: "stepper",
                name: name.to_string(),
            }
            .into());
        }
        // Buffered moves must reach the trajectory before the enable line
        // changes behind them.
        self.scheduler.flush_lookahead();
        self.pump_fired();
        if let Some(stepper) = self.steppers.get_mut(name) {
            stepper.enable(enable, &mut self.scheduler);
        }
        Ok(())
    }

    /// Rebases a stepper once all of its pending motion has been committed.
    pub async fn set_position(&mut self, name: &str, position: f64) -> Result<(), HostError> {
        self.check_running()?;
        let next_cmd_time = match self.table.get(name).copied() {
            Some(ActuatorKind::Stepper) | Some(ActuatorKind::StepperFlap) => {
                self.scheduler.flush_lookahead();
                self.pump_fired();
                match self.steppers.get(name) {
                    Some(stepper) => stepper.next_cmd_time(),
                    None => self.stepper_flaps.get(name).map_or(0.0, |f| f.next_cmd_time()),
                }
            }
            _ => {
                return Err(CommandError::UnknownTarget {
                    kind: "stepper",
                    name: name.to_string(),
                }
                .into());
            }
        };
        self.scheduler.wait_print_time(next_cmd_time).await;
        if let Some(stepper) = self.steppers.get_mut(name) {
            stepper.set_position(position)?;
        } else if let Some(flap) = self.stepper_flaps.get_mut(name) {
            flap.set_position(position)?;
        }
        Ok(())
    }

    fn check_running(&self) -> Result<(), HostError> {
        match self.shutdown.reason() {
            Some(reason) => Err(HostError::Shutdown(reason.message)),
            None => Ok(()),
        }
    }

    fn set_flap_value(&mut self, name: &str, value: f64) -> Result<(), HostError> {
        let value = normalize_value(value);
        if let Some(flap) = self.stepper_flaps.get_mut(name) {
            flap.set_value(value, &mut self.scheduler);
        } else {
            lookup_flap(&mut self.flaps, name)?.set_value(value, &mut self.scheduler);
        }
        Ok(())
    }

    /// Parses and runs one console command. Returns the text response.
    pub async fn execute(&mut self, line: &str) -> Result<String, HostError> {
        let command = AuxCommand::parse(line)?;
        if !matches!(command, AuxCommand::FlapDebug { .. }) {
            self.check_running()?;
        }
        let response = match command {
            AuxCommand::FlapSet { flap, value, width } => {
                match (value, width) {
                    (_, Some(width)) => lookup_flap(&mut self.flaps, &flap)?.set_width(width, &mut self.scheduler)?,
                    (Some(value), None) => self.set_flap_value(&flap, value)?,
                    (None, None) => {}
                }
                String::new()
            }
            AuxCommand::FlapAutotune { flap, overrides } => {
                lookup_flap(&mut self.flaps, &flap)?.start_autotune(overrides)?;
                format!("Autotune of {} started", flap)
            }
            AuxCommand::FlapDebug { flap } => lookup_flap(&mut self.flaps, &flap)?.debug(),
            AuxCommand::SetFanSpeed { fan, speed } => {
                self.set_flap_value(&fan, speed)?;
                String::new()
            }
            AuxCommand::M106 { speed } => {
                self.set_print_fan(speed)?;
                String::new()
            }
            AuxCommand::M107 => {
                self.set_print_fan(0.0)?;
                String::new()
            }
            AuxCommand::IndependentStepper {
                stepper,
                enable,
                set_position,
                speed,
                accel,
                move_to,
            } => {
                if let Some(enable) = enable {
                    self.enable_stepper(&stepper, enable)?;
                }
                if let Some(position) = set_position {
                    self.set_position(&stepper, position).await?;
                }
                if let Some(position) = move_to {
                    self.move_stepper(&stepper, position, speed, accel)?;
                }
                String::new()
            }
        };
        self.pump_fired();
        Ok(response)
    }

    fn set_print_fan(&mut self, speed: f64) -> Result<(), HostError> {
        let flap = self
            .flaps
            .values_mut()
            .find(|f| f.is_print_fan())
            .ok_or_else(|| CommandError::UnknownTarget {
                kind: "print fan flap",
                name: "M106".to_string(),
            })?;
        flap.set_value(speed, &mut self.scheduler);
        Ok(())
    }

    pub fn status(&self) -> HostStatus {
        HostStatus {
            steppers: self.steppers.values().map(|s| s.status()).collect(),
            flaps: self.flaps.values().map(|f| f.status()).collect(),
            stepper_flaps: self.stepper_flaps.values().map(|f| f.status()).collect(),
            shutdown: self.shutdown.reason().map(|r| r.message),
        }
    }

    /// Event loop: runs until stopped, until every channel closes or until
    /// the emergency shutdown fires.
    pub async fn run(
        &mut self,
        mut samples: mpsc::UnboundedReceiver<FeedbackSample>,
        mut events: mpsc::Receiver<HostEvent>,
    ) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut flush = tokio::time::interval(tokio::time::Duration::from_secs_f64(FLUSH_INTERVAL));
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut samples_open = true;
        let mut events_open = true;
        if self.shutdown.is_shutdown() {
            return;
        }
        loop {
            tokio::select! {
                reason = shutdown_rx.recv() => {
                    if let Ok(reason) = reason {
                        tracing::info!("Auxiliary host stopping: {}", reason.message);
                    }
                    break;
                }
                sample = samples.recv(), if samples_open => match sample {
                    Some(sample) => self.handle_sample(&sample),
                    None => samples_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Some(HostEvent::Command { line, respond_to }) => {
                        let result = self.execute(&line).await;
                        if let Err(err) = &result {
                            tracing::warn!("{}: {}", line, err);
                        }
                        let _ = respond_to.send(result.map_err(|e| e.to_string()));
                    }
                    Some(HostEvent::Stop) => break,
                    None => events_open = false,
                },
                _ = flush.tick() => self.flush(),
            }
            if !samples_open && !events_open {
                break;
            }
        }
        self.flush();
    }
}

fn lookup_flap<'a>(flaps: &'a mut BTreeMap<String, ServoFlap>, name: &str) -> Result<&'a mut ServoFlap, CommandError> {
    flaps.get_mut(name).ok_or_else(|| CommandError::UnknownTarget {
        kind: "flap",
        name: name.to_string(),
    })
}
