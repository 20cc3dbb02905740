// src/config/mod.rs - Auxiliary actuator configuration
//!
//! Configuration is a single TOML file. Every section has serde defaults so a
//! minimal file only names the actuators:
//!
//! ```toml
//! [steppers.spool]
//! velocity = 5.0
//!
//! [flaps.part_cooling]
//! perform_range_tune = true
//! validate_range_min = 0.0005
//! ```
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;

/// Narrowest pulse width a hobby servo accepts.
pub const MIN_PULSE_WIDTH: f64 = 0.00005;
/// Widest pulse width a hobby servo accepts.
pub const MAX_PULSE_WIDTH: f64 = 0.0025;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub steppers: HashMap<String, StepperConfig>,

    #[serde(default)]
    pub flaps: HashMap<String, ServoFlapConfig>,

    #[serde(default)]
    pub stepper_flaps: HashMap<String, StepperFlapConfig>,
}

/// Feedback sampling shared by all servo flaps.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Feedback report interval in seconds.
    #[serde(default = "default_report_time")]
    pub report_time: f64,
    /// Consecutive bad samples tolerated before shutdown.
    #[serde(default = "default_range_check_count")]
    pub range_check_count: u32,
    #[serde(default)]
    pub feedback_min: f64,
    #[serde(default = "default_feedback_max")]
    pub feedback_max: f64,
}

/// Independently driven stepper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepperConfig {
    #[serde(default = "default_velocity")]
    pub velocity: f64,
    #[serde(default)]
    pub accel: f64,
    #[serde(default = "default_true")]
    pub disable_when_inactive: bool,
    #[serde(default = "default_disable_delay")]
    pub disable_delay: f64,
}

/// Servo driven flap with analog end-stop feedback.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServoFlapConfig {
    #[serde(default = "default_minimum_pulse_width")]
    pub minimum_pulse_width: f64,
    #[serde(default = "default_maximum_pulse_width")]
    pub maximum_pulse_width: f64,
    #[serde(default)]
    pub start_value: f64,
    /// Defaults to the middle of the configured pulse range.
    #[serde(default)]
    pub tuning_start_width: Option<f64>,
    #[serde(default = "default_tuning_step")]
    pub tuning_step: f64,
    #[serde(default = "default_tuning_threshold", alias = "tuning_treshold")]
    pub tuning_threshold: f64,
    #[serde(default = "default_tuning_start_time")]
    pub tuning_start_time: f64,
    #[serde(default = "default_tuning_step_time")]
    pub tuning_step_time: f64,
    #[serde(default = "default_tuning_spring_back")]
    pub tuning_spring_back: f64,
    #[serde(default)]
    pub validate_upper_max: Option<f64>,
    #[serde(default)]
    pub validate_upper_min: Option<f64>,
    #[serde(default)]
    pub validate_lower_max: Option<f64>,
    #[serde(default)]
    pub validate_lower_min: Option<f64>,
    #[serde(default)]
    pub validate_range_max: Option<f64>,
    #[serde(default)]
    pub validate_range_min: Option<f64>,
    #[serde(default)]
    pub perform_range_tune: bool,
    /// Seconds of inactivity before the servo is powered off. Zero disables.
    #[serde(default)]
    pub power_off_time: f64,
    #[serde(default)]
    pub is_print_fan: bool,
    #[serde(default)]
    pub open_at_sp: bool,
    #[serde(default = "default_absolute_min_width")]
    pub absolute_min_width: f64,
    #[serde(default = "default_absolute_max_width")]
    pub absolute_max_width: f64,
}

/// Flap driven by an independent stepper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepperFlapConfig {
    #[serde(default = "default_velocity")]
    pub velocity: f64,
    #[serde(default)]
    pub accel: f64,
    #[serde(default)]
    pub invert: bool,
    #[serde(default)]
    pub start_value: f64,
    #[serde(default = "default_true")]
    pub disable_when_inactive: bool,
    #[serde(default = "default_disable_delay")]
    pub disable_delay: f64,
}

// Default value functions
fn default_report_time() -> f64 { 0.100 }
fn default_range_check_count() -> u32 { 4 }
fn default_feedback_max() -> f64 { 1.0 }
fn default_velocity() -> f64 { 5.0 }
fn default_true() -> bool { true }
fn default_disable_delay() -> f64 { 2.0 }
fn default_minimum_pulse_width() -> f64 { 0.001 }
fn default_maximum_pulse_width() -> f64 { 0.002 }
fn default_tuning_step() -> f64 { 0.000005 }
fn default_tuning_threshold() -> f64 { 0.1 }
fn default_tuning_start_time() -> f64 { 1.0 }
fn default_tuning_step_time() -> f64 { 0.5 }
fn default_tuning_spring_back() -> f64 { 0.0001 }
fn default_absolute_min_width() -> f64 { MIN_PULSE_WIDTH }
fn default_absolute_max_width() -> f64 { MAX_PULSE_WIDTH }

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            report_time: default_report_time(),
            range_check_count: default_range_check_count(),
            feedback_min: 0.0,
            feedback_max: default_feedback_max(),
        }
    }
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            velocity: default_velocity(),
            accel: 0.0,
            disable_when_inactive: true,
            disable_delay: default_disable_delay(),
        }
    }
}

impl Default for ServoFlapConfig {
    fn default() -> Self {
        Self {
            minimum_pulse_width: default_minimum_pulse_width(),
            maximum_pulse_width: default_maximum_pulse_width(),
            start_value: 0.0,
            tuning_start_width: None,
            tuning_step: default_tuning_step(),
            tuning_threshold: default_tuning_threshold(),
            tuning_start_time: default_tuning_start_time(),
            tuning_step_time: default_tuning_step_time(),
            tuning_spring_back: default_tuning_spring_back(),
            validate_upper_max: None,
            validate_upper_min: None,
            validate_lower_max: None,
            validate_lower_min: None,
            validate_range_max: None,
            validate_range_min: None,
            perform_range_tune: false,
            power_off_time: 0.0,
            is_print_fan: false,
            open_at_sp: false,
            absolute_min_width: default_absolute_min_width(),
            absolute_max_width: default_absolute_max_width(),
        }
    }
}

impl Default for StepperFlapConfig {
    fn default() -> Self {
        Self {
            velocity: default_velocity(),
            accel: 0.0,
            invert: false,
            start_value: 0.0,
            disable_when_inactive: true,
            disable_delay: default_disable_delay(),
        }
    }
}

impl ServoFlapConfig {
    /// Width the autotune starts from.
    pub fn start_width(&self) -> f64 {
        self.tuning_start_width.unwrap_or(
            self.minimum_pulse_width + (self.maximum_pulse_width - self.minimum_pulse_width) * 0.5,
        )
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let section = format!("flaps.{}", name);
        let values = [
            ("minimum_pulse_width", Some(self.minimum_pulse_width)),
            ("maximum_pulse_width", Some(self.maximum_pulse_width)),
            ("start_value", Some(self.start_value)),
            ("tuning_start_width", self.tuning_start_width),
            ("tuning_step", Some(self.tuning_step)),
            ("tuning_threshold", Some(self.tuning_threshold)),
            ("tuning_start_time", Some(self.tuning_start_time)),
            ("tuning_step_time", Some(self.tuning_step_time)),
            ("tuning_spring_back", Some(self.tuning_spring_back)),
            ("validate_upper_max", self.validate_upper_max),
            ("validate_upper_min", self.validate_upper_min),
            ("validate_lower_max", self.validate_lower_max),
            ("validate_lower_min", self.validate_lower_min),
            ("validate_range_max", self.validate_range_max),
            ("validate_range_min", self.validate_range_min),
            ("power_off_time", Some(self.power_off_time)),
            ("absolute_min_width", Some(self.absolute_min_width)),
            ("absolute_max_width", Some(self.absolute_max_width)),
        ];
        for (key, value) in values {
            if let Some(value) = value {
                check_finite(&section, key, value)?;
            }
        }
        if self.minimum_pulse_width >= self.maximum_pulse_width {
            return Err(ConfigError::invalid(
                &section,
                "maximum_pulse_width",
                format!(
                    "must be above minimum_pulse_width ({})",
                    self.minimum_pulse_width
                ),
            ));
        }
        if self.absolute_min_width >= self.absolute_max_width {
            return Err(ConfigError::invalid(
                &section,
                "absolute_max_width",
                "must be above absolute_min_width",
            ));
        }
        if !(0.0..=1.0).contains(&self.start_value) {
            return Err(ConfigError::invalid(&section, "start_value", "must be within 0..1"));
        }
        let start = self.start_width();
        if start < self.absolute_min_width || start > self.absolute_max_width {
            return Err(ConfigError::invalid(
                &section,
                "tuning_start_width",
                format!(
                    "{} is outside of [{}, {}]",
                    start, self.absolute_min_width, self.absolute_max_width
                ),
            ));
        }
        let positive = [
            ("tuning_step", self.tuning_step),
            ("tuning_threshold", self.tuning_threshold),
            ("tuning_start_time", self.tuning_start_time),
            ("tuning_step_time", self.tuning_step_time),
        ];
        for (key, value) in positive {
            if value <= 0.0 {
                return Err(ConfigError::invalid(&section, key, "must be positive"));
            }
        }
        if self.tuning_spring_back < 0.0 {
            return Err(ConfigError::invalid(&section, "tuning_spring_back", "must not be negative"));
        }
        if self.power_off_time < 0.0 {
            return Err(ConfigError::invalid(&section, "power_off_time", "must not be negative"));
        }
        let pairs = [
            ("validate_upper_min", self.validate_upper_min, self.validate_upper_max),
            ("validate_lower_min", self.validate_lower_min, self.validate_lower_max),
            ("validate_range_min", self.validate_range_min, self.validate_range_max),
        ];
        for (key, min, max) in pairs {
            if let (Some(min), Some(max)) = (min, max) {
                if min > max {
                    return Err(ConfigError::invalid(
                        &section,
                        key,
                        format!("{} is above the matching maximum {}", min, max),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// NaN and infinities slip through ordered comparisons, so every float key is
/// checked up front.
fn check_finite(section: &str, key: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::invalid(section, key, format!("{} is not a finite number", value)));
    }
    Ok(())
}

fn validate_motion(section: &str, velocity: f64, accel: f64, disable_delay: f64) -> Result<(), ConfigError> {
    check_finite(section, "velocity", velocity)?;
    check_finite(section, "accel", accel)?;
    check_finite(section, "disable_delay", disable_delay)?;
    if velocity <= 0.0 {
        return Err(ConfigError::invalid(section, "velocity", "must be positive"));
    }
    if accel < 0.0 {
        return Err(ConfigError::invalid(section, "accel", "must not be negative"));
    }
    if disable_delay < 0.0 {
        return Err(ConfigError::invalid(section, "disable_delay", "must not be negative"));
    }
    Ok(())
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_finite("host", "report_time", self.host.report_time)?;
        check_finite("host", "feedback_min", self.host.feedback_min)?;
        check_finite("host", "feedback_max", self.host.feedback_max)?;
        if self.host.report_time <= 0.0 {
            return Err(ConfigError::invalid("host", "report_time", "must be positive"));
        }
        if self.host.range_check_count == 0 {
            return Err(ConfigError::invalid("host", "range_check_count", "must be at least 1"));
        }
        if self.host.feedback_min >= self.host.feedback_max {
            return Err(ConfigError::invalid("host", "feedback_max", "must be above feedback_min"));
        }
        for (name, stepper) in &self.steppers {
            validate_motion(
                &format!("steppers.{}", name),
                stepper.velocity,
                stepper.accel,
                stepper.disable_delay,
            )?;
        }
        for (name, flap) in &self.stepper_flaps {
            let section = format!("stepper_flaps.{}", name);
            validate_motion(&section, flap.velocity, flap.accel, flap.disable_delay)?;
            check_finite(&section, "start_value", flap.start_value)?;
            if !(0.0..=1.0).contains(&flap.start_value) {
                return Err(ConfigError::invalid(&section, "start_value", "must be within 0..1"));
            }
        }
        for (name, flap) in &self.flaps {
            flap.validate(name)?;
        }
        let print_fans = self.flaps.values().filter(|f| f.is_print_fan).count();
        if print_fans > 1 {
            return Err(ConfigError::invalid(
                "flaps",
                "is_print_fan",
                format!("only one flap may drive the print fan, found {}", print_fans),
            ));
        }
        let mut names: Vec<&String> = self
            .steppers
            .keys()
            .chain(self.flaps.keys())
            .chain(self.stepper_flaps.keys())
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();
        if names.len() != total {
            return Err(ConfigError::invalid(
                "config",
                "name",
                "actuator names must be unique across sections",
            ));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_config(&self, config_path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid("config", "serialize", e.to_string()))?;
        std::fs::write(config_path, toml_string)?;
        Ok(())
    }
}

/// Loads and validates a configuration file.
pub fn load_config(config_path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = config_path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let config = Config::from_toml_str(&contents)?;
    tracing::info!(
        "Loaded configuration from {}: {} steppers, {} flaps, {} stepper flaps",
        path.display(),
        config.steppers.len(),
        config.flaps.len(),
        config.stepper_flaps.len()
    );
    Ok(config)
}
