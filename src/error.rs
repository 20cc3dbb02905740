// src/error.rs - Error taxonomy for the auxiliary actuator layer
use thiserror::Error;

/// Invalid static configuration. Raised at startup, before any actuator runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for {section}.{key}: {reason}")]
    Invalid {
        section: String,
        key: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid(section: &str, key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section: section.to_string(),
            key,
            reason: reason.into(),
        }
    }
}

/// A single bad feedback read.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SampleError {
    #[error("feedback read failed: {0}")]
    Read(String),
    #[error("feedback value {value} outside of range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("feedback source closed")]
    Closed,
}

/// Fatal calibration outcome.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Servo flap {flap} tuning cannot find upper limit")]
    UpperLimitNotFound { flap: String },
    #[error("Servo flap {flap} tuning cannot find lower limit")]
    LowerLimitNotFound { flap: String },
    #[error("Servo flap {flap} seems to have invalid range. Following errors occurred:\n{diagnostic}")]
    Validation { flap: String, diagnostic: String },
}

/// An internal invariant was violated; execution continues.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConsistencyError {
    #[error("Move queue of {actuator} is empty when its commit callback fired")]
    EmptyQueueOnCommit { actuator: String },
    #[error("Move queue of {actuator} has no open batch to append to")]
    NoOpenBatch { actuator: String },
    #[error("Move queue of {actuator} isn't empty while the primary lookahead is")]
    PendingWhileIdle { actuator: String },
    #[error("Lookahead ticket for unknown actuator {actuator}")]
    UnknownActuator { actuator: String },
}

/// `set_position` could not empty the pending queue.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Move queue of {actuator} wasn't emptied after flushing ({pending} batches pending)")]
pub struct DrainError {
    pub actuator: String,
    pub pending: usize,
}

/// Malformed console command.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Malformed parameter '{0}'")]
    Malformed(String),
    #[error("Unable to parse '{value}' as a number for {key}")]
    NotANumber { key: String, value: String },
    #[error("Error on '{key}': missing required parameter")]
    Missing { key: String },
    #[error("Error on '{key}': {value} must be {constraint}")]
    OutOfRange {
        key: String,
        value: f64,
        constraint: String,
    },
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Unknown {kind} '{name}'")]
    UnknownTarget { kind: &'static str, name: String },
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
    #[error("Drain error: {0}")]
    Drain(#[from] DrainError),
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Printer is shut down: {0}")]
    Shutdown(String),
}
