// src/lib.rs - Auxiliary actuator coordination and flap autotune
pub mod command;
pub mod config;
pub mod error;
pub mod feedback;
pub mod flap;
pub mod hardware;
pub mod host;
pub mod motion;
pub mod simulator;

pub use config::{Config, load_config};
pub use error::{CalibrationError, CommandError, ConfigError, ConsistencyError, DrainError, HostError, SampleError};
pub use host::{AuxHost, HostEvent, HostStatus};
