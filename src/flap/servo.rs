// src/flap/servo.rs - Servo driven flap with analog end-stop feedback
use serde::Serialize;

use crate::config::ServoFlapConfig;
use crate::error::{CalibrationError, CommandError};
use crate::flap::calibration::{CalibrationAction, CalibrationParams, CalibrationSession, CalibrationState};
use crate::hardware::ServoOutput;
use crate::motion::ActuatorState;
use crate::motion::scheduler::{DeferredCommand, LookaheadTicket, PrimaryScheduler, Registration};

/// Minimum spacing between two pulse width changes.
pub const SERVO_MIN_TIME: f64 = 0.100;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlapStatus {
    pub name: String,
    pub value: f64,
    pub width: f64,
    pub feedback: Option<f64>,
    pub tuning_state: CalibrationState,
    pub min_width: f64,
    pub max_width: f64,
    pub powered: bool,
}

/// Parameters of a `FLAP_AUTOTUNE` request that replace the configured ones.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AutotuneOverrides {
    pub min_pw: Option<f64>,
    pub max_pw: Option<f64>,
    pub start_pw: Option<f64>,
    pub spring_back: Option<f64>,
}

pub struct ServoFlap {
    name: String,
    config: ServoFlapConfig,
    output: Box<dyn ServoOutput>,
    min_width: f64,
    max_width: f64,
    last_value: Option<f64>,
    width: f64,
    last_time: f64,
    /// Settle time armed by the next applied width change.
    move_time: f64,
    move_done_at: f64,
    pending_widths: usize,
    power_off_at: Option<f64>,
    feedback: Option<f64>,
    tuning_state: CalibrationState,
    session: Option<CalibrationSession>,
}

impl ServoFlap {
    pub fn new(name: impl Into<String>, config: ServoFlapConfig, output: Box<dyn ServoOutput>) -> Self {
        Self {
            name: name.into(),
            min_width: config.minimum_pulse_width,
            max_width: config.maximum_pulse_width,
            config,
            output,
            last_value: None,
            width: 0.0,
            last_time: 0.0,
            move_time: SERVO_MIN_TIME,
            move_done_at: 0.0,
            pending_widths: 0,
            power_off_at: None,
            feedback: None,
            tuning_state: CalibrationState::NotTuned,
            session: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServoFlapConfig {
        &self.config
    }

    pub fn is_print_fan(&self) -> bool {
        self.config.is_print_fan
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn tuning_state(&self) -> CalibrationState {
        self.tuning_state
    }

    pub fn is_calibrating(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&CalibrationSession> {
        self.session.as_ref()
    }

    /// Startup: tune the range when configured, otherwise move to the rest value.
    pub fn on_connect(&mut self, scheduler: &mut dyn PrimaryScheduler) {
        if self.config.perform_range_tune {
            if let Err(err) = self.start_autotune(AutotuneOverrides::default()) {
                tracing::warn!("{}: startup autotune rejected: {}", self.name, err);
            }
        } else {
            self.set_value(self.config.start_value, scheduler);
        }
    }

    /// Commands a normalized opening in `0.0..=1.0`.
    pub fn set_value(&mut self, value: f64, scheduler: &mut dyn PrimaryScheduler) {
        let value = value.clamp(0.0, 1.0);
        if self.last_value == Some(value) {
            return;
        }
        self.last_value = Some(value);
        let opening = if self.config.open_at_sp { 1.0 - value } else { value };
        let width = self.min_width + (self.max_width - self.min_width) * opening;
        self.move_time = SERVO_MIN_TIME;
        self.request_width(width, scheduler);
    }

    /// Commands a raw pulse width. Zero powers the servo off.
    pub fn set_width(&mut self, width: f64, scheduler: &mut dyn PrimaryScheduler) -> Result<(), CommandError> {
        if width != 0.0 && !(self.config.absolute_min_width..=self.config.absolute_max_width).contains(&width) {
            return Err(CommandError::OutOfRange {
                key: "WIDTH".to_string(),
                value: width,
                constraint: format!(
                    "0 or within [{}, {}]",
                    self.config.absolute_min_width, self.config.absolute_max_width
                ),
            });
        }
        self.last_value = None;
        self.move_time = SERVO_MIN_TIME;
        self.request_width(width, scheduler);
        Ok(())
    }

    fn request_width(&mut self, width: f64, scheduler: &mut dyn PrimaryScheduler) {
        let ticket = LookaheadTicket::new(self.name.clone(), DeferredCommand::SetWidth(width));
        match scheduler.register_lookahead_callback(ticket) {
            Registration::Deferred => self.pending_widths += 1,
            Registration::Immediate { print_time } => self.apply_width(width, print_time),
        }
    }

    /// Runs a fired lookahead ticket.
    pub fn dispatch(&mut self, command: &DeferredCommand, print_time: f64) {
        match command {
            DeferredCommand::SetWidth(width) => {
                self.pending_widths = self.pending_widths.saturating_sub(1);
                self.apply_width(*width, print_time);
            }
            other => tracing::warn!("{}: ignoring {:?} for a servo flap", self.name, other),
        }
    }

    fn apply_width(&mut self, width: f64, print_time: f64) {
        if width == self.width {
            return;
        }
        let print_time = print_time.max(self.last_time + SERVO_MIN_TIME);
        if width == 0.0 {
            self.output.power_off(print_time);
            self.power_off_at = None;
        } else {
            self.output.set_width(print_time, width);
            if self.config.power_off_time > 0.0 {
                self.power_off_at = Some(print_time + self.config.power_off_time);
            }
        }
        self.width = width;
        self.last_time = print_time;
        self.move_done_at = print_time + self.move_time;
    }

    /// True once the last width change has settled and none is in flight.
    pub fn move_done(&self, now: f64) -> bool {
        self.pending_widths == 0 && now >= self.move_done_at
    }

    /// Restarts the range autotune, discarding any session in progress.
    pub fn start_autotune(&mut self, overrides: AutotuneOverrides) -> Result<(), CommandError> {
        let min_pw = overrides.min_pw.unwrap_or(self.min_width);
        let max_pw = overrides.max_pw.unwrap_or(self.max_width);
        if min_pw >= max_pw {
            return Err(CommandError::OutOfRange {
                key: "MAX_PW".to_string(),
                value: max_pw,
                constraint: format!("above MIN_PW ({})", min_pw),
            });
        }
        let range_changed = overrides.min_pw.is_some() || overrides.max_pw.is_some();
        let mut config = self.config.clone();
        if let Some(start) = overrides.start_pw {
            config.tuning_start_width = Some(start);
        } else if range_changed {
            config.tuning_start_width = Some(min_pw + (max_pw - min_pw) * 0.5);
        }
        if let Some(spring_back) = overrides.spring_back {
            config.tuning_spring_back = spring_back;
        }
        let params = CalibrationParams::from(&config);
        if !(params.floor..=params.ceiling).contains(&params.start_width) {
            return Err(CommandError::OutOfRange {
                key: "START_PW".to_string(),
                value: params.start_width,
                constraint: format!("within [{}, {}]", params.floor, params.ceiling),
            });
        }
        self.config = config;
        self.min_width = min_pw;
        self.max_width = max_pw;
        if self.session.is_some() {
            tracing::info!("{}: autotune restarted", self.name);
        } else {
            tracing::info!("{}: autotune started from {:.6}", self.name, params.start_width);
        }
        self.session = Some(CalibrationSession::new(self.name.clone(), params));
        self.tuning_state = CalibrationState::TuningStart;
        Ok(())
    }

    /// Consumes one feedback sample taken at print time `now`.
    ///
    /// Drives the calibration session when one is active and applies the idle
    /// power-off otherwise. A fatal calibration outcome is returned once.
    pub fn handle_sample(
        &mut self,
        value: f64,
        now: f64,
        scheduler: &mut dyn PrimaryScheduler,
    ) -> Result<(), CalibrationError> {
        self.feedback = Some(value);
        if self.session.is_none() {
            self.check_power_off(now, scheduler);
            return Ok(());
        }
        if !self.move_done(now) {
            return Ok(());
        }
        let action = match self.session.as_mut() {
            Some(session) => {
                let action = session.on_sample(value);
                self.tuning_state = session.state();
                action
            }
            None => None,
        };
        match action {
            Some(CalibrationAction::SetWidth { width, settle }) => {
                self.move_time = settle;
                self.request_width(width, scheduler);
                Ok(())
            }
            Some(CalibrationAction::Done(range)) => {
                self.session = None;
                self.min_width = range.min;
                self.max_width = range.max;
                self.last_value = None;
                self.set_value(self.config.start_value, scheduler);
                Ok(())
            }
            Some(CalibrationAction::Failed(err)) => {
                self.session = None;
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn check_power_off(&mut self, now: f64, scheduler: &mut dyn PrimaryScheduler) {
        let Some(deadline) = self.power_off_at else {
            return;
        };
        if now < deadline || self.pending_widths > 0 {
            return;
        }
        self.power_off_at = None;
        self.last_value = None;
        tracing::debug!("{}: idle for {:.1}s, powering off", self.name, self.config.power_off_time);
        self.move_time = SERVO_MIN_TIME;
        self.request_width(0.0, scheduler);
    }

    pub fn state(&self) -> ActuatorState {
        ActuatorState {
            commanded_value: self.width,
            last_commit_time: self.last_time,
            energized: self.width > 0.0,
            power_off_deadline: self.power_off_at,
        }
    }

    pub fn status(&self) -> FlapStatus {
        FlapStatus {
            name: self.name.clone(),
            value: self.last_value.unwrap_or(0.0),
            width: self.width,
            feedback: self.feedback,
            tuning_state: self.tuning_state,
            min_width: self.min_width,
            max_width: self.max_width,
            powered: self.width > 0.0,
        }
    }

    pub fn debug(&self) -> String {
        let feedback = self
            .feedback
            .map_or_else(|| "none".to_string(), |v| format!("{:.4}", v));
        format!(
            "Current feedback reading: {}, min pulse width: {}, max pulse width: {}, servo state machine: {:?}",
            feedback, self.min_width, self.max_width, self.tuning_state
        )
    }
}
