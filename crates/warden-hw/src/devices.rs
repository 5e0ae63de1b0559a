//! Output device configuration.
//!
//! A devices file is a list of `[[device]]` tables:
//!
//! ```toml
//! [[device]]
//! kind = "digital"
//! pin = 17
//! blink = true
//!
//! [[device]]
//! kind = "pwm"
//! chip = 0
//! channel = 0
//! frequency = 50
//! duty_on = 8.2
//! duty_off = 13.2
//! ```

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_PWM_FREQUENCY: u32 = 50;
/// Servo barrier "raised" duty cycle, percent.
pub const DEFAULT_DUTY_ON: f32 = 8.2;
/// Servo barrier "lowered" duty cycle, percent.
pub const DEFAULT_DUTY_OFF: f32 = 13.2;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("failed to read devices file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid devices file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid device #{index}: {reason}")]
    Invalid { index: usize, reason: String },
    #[error("invalid device parameter: {0}")]
    InvalidParameter(String),
    #[error("sysfs write to {path} failed: {source}")]
    Sysfs {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceSpec {
    /// GPIO line driven high for ON.
    Digital {
        pin: u32,
        #[serde(default)]
        blink: bool,
    },
    /// PWM channel switching between two duty cycles.
    Pwm {
        #[serde(default)]
        chip: u32,
        channel: u32,
        #[serde(default = "default_frequency")]
        frequency: u32,
        #[serde(default = "default_duty_on")]
        duty_on: f32,
        #[serde(default = "default_duty_off")]
        duty_off: f32,
        #[serde(default)]
        blink: bool,
    },
}

fn default_frequency() -> u32 {
    DEFAULT_PWM_FREQUENCY
}

fn default_duty_on() -> f32 {
    DEFAULT_DUTY_ON
}

fn default_duty_off() -> f32 {
    DEFAULT_DUTY_OFF
}

impl DeviceSpec {
    pub fn blink(&self) -> bool {
        match self {
            DeviceSpec::Digital { blink, .. } | DeviceSpec::Pwm { blink, .. } => *blink,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if let DeviceSpec::Pwm {
            frequency,
            duty_on,
            duty_off,
            ..
        } = self
        {
            if *frequency == 0 {
                return Err("pwm frequency must be greater than 0".into());
            }
            for (name, duty) in [("duty_on", duty_on), ("duty_off", duty_off)] {
                if !(0.0..=100.0).contains(duty) {
                    return Err(format!("{name} {duty} is outside 0..=100 percent"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct DeviceFile {
    #[serde(default)]
    device: Vec<DeviceSpec>,
}

/// Parse and validate a devices document.
pub fn parse_devices(src: &str) -> Result<Vec<DeviceSpec>, DeviceError> {
    let file: DeviceFile = toml::from_str(src)?;
    for (index, spec) in file.device.iter().enumerate() {
        spec.validate()
            .map_err(|reason| DeviceError::Invalid { index, reason })?;
    }
    Ok(file.device)
}

pub fn load_devices(path: &Path) -> Result<Vec<DeviceSpec>, DeviceError> {
    let src = std::fs::read_to_string(path).map_err(|source| DeviceError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let specs = parse_devices(&src)?;
    tracing::info!(path = %path.display(), count = specs.len(), "loaded output devices");
    Ok(specs)
}
