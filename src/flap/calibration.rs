// src/flap/calibration.rs - Servo range autotune state machine
//!
//! The session walks the servo outward from a start width until the feedback
//! signal crosses the threshold (upper end stop), then inward to the lower end
//! stop. Each trigger point is pulled back by the springback margin. The
//! discovered range is validated against the configured bounds before it may
//! be used.
//!
//! The session only decides; the owning flap applies widths, gates samples on
//! move completion and invokes the shutdown on failure.
use serde::Serialize;

use crate::config::ServoFlapConfig;
use crate::error::CalibrationError;

/// Remediation hint appended to every calibration shutdown message.
pub const HINT_SERVO_FLAP: &str =
    "This may indicate servo mechanism malfunction. Check servo wiring and flap mechanical parts.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CalibrationState {
    NotTuned,
    TuningStart,
    TuningUpper,
    TuningLower,
    TuningValidate,
    Done,
    Error,
}

impl CalibrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CalibrationState::Done | CalibrationState::Error)
    }
}

/// Optional acceptance bounds for a discovered range.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValidationBounds {
    pub upper_max: Option<f64>,
    pub upper_min: Option<f64>,
    pub lower_max: Option<f64>,
    pub lower_min: Option<f64>,
    pub range_max: Option<f64>,
    pub range_min: Option<f64>,
}

impl ValidationBounds {
    /// Lists every violated bound. Empty when the range is acceptable.
    pub fn check(&self, min: f64, max: f64) -> Vec<String> {
        let range = max - min;
        let mut violations = Vec::new();
        if min >= max {
            violations.push(format!(
                "Range should be positive, but lower limit {} is not below upper limit {}.",
                min, max
            ));
        }
        if let Some(bound) = self.upper_max.filter(|b| max > *b) {
            violations.push(format!(
                "validate_upper_max: max_pulse_width should be <= {}, but is {}.",
                bound, max
            ));
        }
        if let Some(bound) = self.upper_min.filter(|b| max < *b) {
            violations.push(format!(
                "validate_upper_min: max_pulse_width should be >= {}, but is {}.",
                bound, max
            ));
        }
        if let Some(bound) = self.lower_max.filter(|b| min > *b) {
            violations.push(format!(
                "validate_lower_max: min_pulse_width should be <= {}, but is {}.",
                bound, min
            ));
        }
        if let Some(bound) = self.lower_min.filter(|b| min < *b) {
            violations.push(format!(
                "validate_lower_min: min_pulse_width should be >= {}, but is {}.",
                bound, min
            ));
        }
        if let Some(bound) = self.range_max.filter(|b| range > *b) {
            violations.push(format!(
                "validate_range_max: range should be <= {}, but is {}.",
                bound, range
            ));
        }
        if let Some(bound) = self.range_min.filter(|b| range < *b) {
            violations.push(format!(
                "validate_range_min: range should be >= {}, but is {}.",
                bound, range
            ));
        }
        violations
    }
}

/// Per-flap tuning constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationParams {
    pub start_width: f64,
    pub step: f64,
    pub threshold: f64,
    /// Settle time after moving to the start width.
    pub start_time: f64,
    /// Settle time after each step.
    pub step_time: f64,
    pub spring_back: f64,
    /// Physical floor; the lower search fails below it.
    pub floor: f64,
    /// Physical ceiling; the upper search fails above it.
    pub ceiling: f64,
    pub bounds: ValidationBounds,
}

impl From<&ServoFlapConfig> for CalibrationParams {
    fn from(config: &ServoFlapConfig) -> Self {
        Self {
            start_width: config.start_width(),
            step: config.tuning_step,
            threshold: config.tuning_threshold,
            start_time: config.tuning_start_time,
            step_time: config.tuning_step_time,
            spring_back: config.tuning_spring_back,
            floor: config.absolute_min_width,
            ceiling: config.absolute_max_width,
            bounds: ValidationBounds {
                upper_max: config.validate_upper_max,
                upper_min: config.validate_upper_min,
                lower_max: config.validate_lower_max,
                lower_min: config.validate_lower_min,
                range_max: config.validate_range_max,
                range_min: config.validate_range_min,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PulseRange {
    pub min: f64,
    pub max: f64,
}

impl PulseRange {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// What the owning flap must do after a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationAction {
    /// Command `width` and wait `settle` seconds before the next decision.
    SetWidth { width: f64, settle: f64 },
    /// Range validated; arm it.
    Done(PulseRange),
    /// Terminal failure; shut down.
    Failed(CalibrationError),
}

#[derive(Debug, Clone)]
pub struct CalibrationSession {
    flap: String,
    params: CalibrationParams,
    state: CalibrationState,
    /// Signed number of steps away from the start width.
    offset_steps: i64,
    discovered_min: Option<f64>,
    discovered_max: Option<f64>,
}

impl CalibrationSession {
    pub fn new(flap: impl Into<String>, params: CalibrationParams) -> Self {
        Self {
            flap: flap.into(),
            params,
            state: CalibrationState::TuningStart,
            offset_steps: 0,
            discovered_min: None,
            discovered_max: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Candidate width currently commanded by the session.
    pub fn current_width(&self) -> f64 {
        self.params.start_width + self.offset_steps as f64 * self.params.step
    }

    pub fn discovered_min(&self) -> Option<f64> {
        self.discovered_min
    }

    pub fn discovered_max(&self) -> Option<f64> {
        self.discovered_max
    }

    /// Advances the session with a settled feedback sample.
    pub fn on_sample(&mut self, feedback: f64) -> Option<CalibrationAction> {
        match self.state {
            CalibrationState::TuningStart => {
                self.offset_steps = 0;
                self.state = CalibrationState::TuningUpper;
                Some(self.recenter())
            }
            CalibrationState::TuningUpper => Some(self.search_upper(feedback)),
            CalibrationState::TuningLower => Some(self.search_lower(feedback)),
            CalibrationState::TuningValidate => Some(self.validate()),
            CalibrationState::NotTuned | CalibrationState::Done | CalibrationState::Error => None,
        }
    }

    fn recenter(&mut self) -> CalibrationAction {
        self.offset_steps = 0;
        CalibrationAction::SetWidth {
            width: self.params.start_width,
            settle: self.params.start_time,
        }
    }

    fn search_upper(&mut self, feedback: f64) -> CalibrationAction {
        let width = self.current_width();
        if feedback >= self.params.threshold {
            let max = width - self.params.spring_back;
            self.discovered_max = Some(max);
            tracing::info!(
                "{}: upper limit found at {:.6}, using {:.6}",
                self.flap,
                width,
                max
            );
            self.state = CalibrationState::TuningLower;
            return self.recenter();
        }
        let next = self.params.start_width + (self.offset_steps + 1) as f64 * self.params.step;
        if next > self.params.ceiling {
            self.state = CalibrationState::Error;
            return CalibrationAction::Failed(CalibrationError::UpperLimitNotFound {
                flap: self.flap.clone(),
            });
        }
        self.offset_steps += 1;
        tracing::debug!("{}: upper search at {:.6} (feedback {:.4})", self.flap, next, feedback);
        CalibrationAction::SetWidth {
            width: next,
            settle: self.params.step_time,
        }
    }

    fn search_lower(&mut self, feedback: f64) -> CalibrationAction {
        let width = self.current_width();
        if feedback >= self.params.threshold {
            let min = width + self.params.spring_back;
            self.discovered_min = Some(min);
            tracing::info!(
                "{}: lower limit found at {:.6}, using {:.6}",
                self.flap,
                width,
                min
            );
            self.state = CalibrationState::TuningValidate;
            return self.recenter();
        }
        let next = self.params.start_width + (self.offset_steps - 1) as f64 * self.params.step;
        if next < self.params.floor {
            self.state = CalibrationState::Error;
            return CalibrationAction::Failed(CalibrationError::LowerLimitNotFound {
                flap: self.flap.clone(),
            });
        }
        self.offset_steps -= 1;
        tracing::debug!("{}: lower search at {:.6} (feedback {:.4})", self.flap, next, feedback);
        CalibrationAction::SetWidth {
            width: next,
            settle: self.params.step_time,
        }
    }

    fn validate(&mut self) -> CalibrationAction {
        let (Some(min), Some(max)) = (self.discovered_min, self.discovered_max) else {
            self.state = CalibrationState::Error;
            return CalibrationAction::Failed(CalibrationError::Validation {
                flap: self.flap.clone(),
                diagnostic: "Range was not discovered.".to_string(),
            });
        };
        let violations = self.params.bounds.check(min, max);
        if !violations.is_empty() {
            self.state = CalibrationState::Error;
            return CalibrationAction::Failed(CalibrationError::Validation {
                flap: self.flap.clone(),
                diagnostic: violations.join("\n"),
            });
        }
        self.state = CalibrationState::Done;
        tracing::info!(
            "{}: range tuned to [{:.6}, {:.6}]",
            self.flap,
            min,
            max
        );
        CalibrationAction::Done(PulseRange { min, max })
    }
}
