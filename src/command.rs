// src/command.rs - Console command grammar for auxiliary actuators
//!
//! Commands are a name followed by `KEY=VALUE` parameters. Classic G-code
//! words such as `S255` are accepted as `S=255`. Names and keys are
//! case-insensitive; values keep their case.
use std::collections::HashMap;

use crate::config::{MAX_PULSE_WIDTH, MIN_PULSE_WIDTH};
use crate::error::CommandError;
use crate::flap::AutotuneOverrides;

/// Limits checked by [`CommandLine::get_float`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FloatSpec {
    pub default: Option<f64>,
    pub minval: Option<f64>,
    pub maxval: Option<f64>,
    pub above: Option<f64>,
}

impl FloatSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_value(mut self, value: f64) -> Self {
        self.default = Some(value);
        self
    }

    pub fn min(mut self, value: f64) -> Self {
        self.minval = Some(value);
        self
    }

    pub fn max(mut self, value: f64) -> Self {
        self.maxval = Some(value);
        self
    }

    pub fn above(mut self, value: f64) -> Self {
        self.above = Some(value);
        self
    }

    fn check(&self, key: &str, value: f64) -> Result<f64, CommandError> {
        let fail = |constraint: String| CommandError::OutOfRange {
            key: key.to_string(),
            value,
            constraint,
        };
        if let Some(min) = self.minval.filter(|m| value < *m) {
            return Err(fail(format!("at least {}", min)));
        }
        if let Some(max) = self.maxval.filter(|m| value > *m) {
            return Err(fail(format!("at most {}", max)));
        }
        if let Some(above) = self.above.filter(|a| value <= *a) {
            return Err(fail(format!("above {}", above)));
        }
        Ok(value)
    }
}

/// A tokenized command line.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    name: String,
    params: HashMap<String, String>,
}

impl CommandLine {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.split(';').next().unwrap_or("").trim();
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(CommandError::Empty)?.to_ascii_uppercase();
        let mut params = HashMap::new();
        for token in tokens {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key, value),
                None => {
                    // G-code word: letter followed by its value
                    let mut chars = token.chars();
                    match chars.next() {
                        Some(letter) if letter.is_ascii_alphabetic() && token.len() > 1 => {
                            token.split_at(letter.len_utf8())
                        }
                        _ => return Err(CommandError::Malformed(token.to_string())),
                    }
                }
            };
            if key.is_empty() {
                return Err(CommandError::Malformed(token.to_string()));
            }
            params.insert(key.to_ascii_uppercase(), value.to_string());
        }
        Ok(Self { name, params })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str, CommandError> {
        self.get_str(key).ok_or_else(|| CommandError::Missing { key: key.to_string() })
    }

    /// Parses `key` as a float. Absent keys yield the `FloatSpec` default.
    pub fn get_float(&self, key: &str, spec: FloatSpec) -> Result<Option<f64>, CommandError> {
        let Some(raw) = self.get_str(key) else {
            return Ok(spec.default);
        };
        let value: f64 = raw.parse().map_err(|_| CommandError::NotANumber {
            key: key.to_string(),
            value: raw.to_string(),
        })?;
        if !value.is_finite() {
            return Err(CommandError::NotANumber {
                key: key.to_string(),
                value: raw.to_string(),
            });
        }
        spec.check(key, value).map(Some)
    }

    pub fn require_float(&self, key: &str, spec: FloatSpec) -> Result<f64, CommandError> {
        self.get_float(key, spec)?
            .ok_or_else(|| CommandError::Missing { key: key.to_string() })
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>, CommandError> {
        let Some(raw) = self.get_str(key) else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|_| CommandError::NotANumber {
            key: key.to_string(),
            value: raw.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuxCommand {
    FlapSet {
        flap: String,
        value: Option<f64>,
        width: Option<f64>,
    },
    FlapAutotune {
        flap: String,
        overrides: AutotuneOverrides,
    },
    FlapDebug {
        flap: String,
    },
    SetFanSpeed {
        fan: String,
        speed: f64,
    },
    /// Print fan speed, normalized to `0.0..=1.0`.
    M106 {
        speed: f64,
    },
    M107,
    IndependentStepper {
        stepper: String,
        enable: Option<bool>,
        set_position: Option<f64>,
        speed: Option<f64>,
        accel: Option<f64>,
        move_to: Option<f64>,
    },
}

impl AuxCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let cmd = CommandLine::parse(line)?;
        let pulse_width = FloatSpec::new().min(MIN_PULSE_WIDTH).max(MAX_PULSE_WIDTH);
        match cmd.name() {
            "FLAP_SET" => {
                let flap = cmd.require_str("FLAP")?.to_string();
                let value = cmd.get_float("VALUE", FloatSpec::new().min(0.0).max(255.0))?;
                let width = cmd.get_float("WIDTH", FloatSpec::new().min(0.0).max(MAX_PULSE_WIDTH))?;
                if value.is_none() && width.is_none() {
                    return Err(CommandError::Missing {
                        key: "VALUE".to_string(),
                    });
                }
                Ok(AuxCommand::FlapSet { flap, value, width })
            }
            "FLAP_AUTOTUNE" => Ok(AuxCommand::FlapAutotune {
                flap: cmd.require_str("FLAP")?.to_string(),
                overrides: AutotuneOverrides {
                    min_pw: cmd.get_float("MIN_PW", pulse_width)?,
                    max_pw: cmd.get_float("MAX_PW", pulse_width)?,
                    start_pw: cmd.get_float("START_PW", pulse_width)?,
                    spring_back: cmd.get_float("SPRINGBACK", FloatSpec::new().min(0.0))?,
                },
            }),
            "FLAP_DEBUG" => Ok(AuxCommand::FlapDebug {
                flap: cmd.require_str("FLAP")?.to_string(),
            }),
            "SET_FAN_SPEED" => Ok(AuxCommand::SetFanSpeed {
                fan: cmd.require_str("FAN")?.to_string(),
                speed: cmd.require_float("SPEED", FloatSpec::new().min(0.0).max(255.0))?,
            }),
            "M106" => {
                let s = cmd.require_float("S", FloatSpec::new().default_value(255.0).min(0.0))?;
                Ok(AuxCommand::M106 {
                    speed: (s / 255.0).min(1.0),
                })
            }
            "M107" => Ok(AuxCommand::M107),
            "INDEPENDENT_STEPPER" => {
                let enable = match cmd.get_int("ENABLE")? {
                    None => None,
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    Some(other) => {
                        return Err(CommandError::OutOfRange {
                            key: "ENABLE".to_string(),
                            value: other as f64,
                            constraint: "0 or 1".to_string(),
                        });
                    }
                };
                Ok(AuxCommand::IndependentStepper {
                    stepper: cmd.require_str("STEPPER")?.to_string(),
                    enable,
                    set_position: cmd.get_float("SET_POSITION", FloatSpec::new())?,
                    speed: cmd.get_float("SPEED", FloatSpec::new().above(0.0))?,
                    accel: cmd.get_float("ACCEL", FloatSpec::new().min(0.0))?,
                    move_to: cmd.get_float("MOVE", FloatSpec::new())?,
                })
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
