//! Sysfs-backed output devices: GPIO lines and PWM channels.
//!
//! Both kinds remember the last steady state they were commanded to and
//! ignore repeats of it. Blinking drives the hardware level directly
//! without touching that state, so `restore` can put it back.

use crate::devices::{DeviceError, DeviceSpec};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class";

fn write_attr(path: &Path, value: &str) -> Result<(), DeviceError> {
    fs::write(path, value).map_err(|source| DeviceError::Sysfs {
        path: path.display().to_string(),
        source,
    })
}

/// Write `index` to `export` unless `node` is already present.
fn ensure_exported(export: &Path, node: &Path, index: u32) -> Result<(), DeviceError> {
    if node.is_dir() {
        return Ok(());
    }
    write_attr(export, &index.to_string())?;
    if !node.is_dir() {
        return Err(DeviceError::Sysfs {
            path: node.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "export did not create node"),
        });
    }
    Ok(())
}

/// GPIO line under `<root>/gpio`. High is ON.
#[derive(Debug)]
pub struct DigitalOutput {
    pin: u32,
    node: PathBuf,
    blink: bool,
    state: bool,
}

impl DigitalOutput {
    pub fn open(sysfs_root: &Path, pin: u32, blink: bool) -> Result<Self, DeviceError> {
        let gpio = sysfs_root.join("gpio");
        let node = gpio.join(format!("gpio{pin}"));
        ensure_exported(&gpio.join("export"), &node, pin)?;
        write_attr(&node.join("direction"), "out")?;
        write_attr(&node.join("value"), "0")?;
        Ok(Self {
            pin,
            node,
            blink,
            state: false,
        })
    }

    fn drive(&self, level: bool) -> Result<(), DeviceError> {
        write_attr(&self.node.join("value"), if level { "1" } else { "0" })
    }
}

/// PWM channel under `<root>/pwm/pwmchipN`. ON and OFF are two duty
/// cycles of the same period, so the channel stays enabled.
#[derive(Debug)]
pub struct PwmOutput {
    chip: u32,
    channel: u32,
    node: PathBuf,
    duty_on_ns: u64,
    duty_off_ns: u64,
    blink: bool,
    state: bool,
}

impl PwmOutput {
    pub fn open(
        sysfs_root: &Path,
        chip: u32,
        channel: u32,
        frequency: u32,
        duty_on: f32,
        duty_off: f32,
        blink: bool,
    ) -> Result<Self, DeviceError> {
        if frequency == 0 {
            return Err(DeviceError::InvalidParameter(
                "pwm frequency must be greater than 0".into(),
            ));
        }
        let period_ns = 1_000_000_000u64 / frequency as u64;
        let duty_ns = |pct: f32| (period_ns as f64 * pct as f64 / 100.0).round() as u64;

        let chip_dir = sysfs_root.join("pwm").join(format!("pwmchip{chip}"));
        let node = chip_dir.join(format!("pwm{channel}"));
        ensure_exported(&chip_dir.join("export"), &node, channel)?;

        let output = Self {
            chip,
            channel,
            node,
            duty_on_ns: duty_ns(duty_on),
            duty_off_ns: duty_ns(duty_off),
            blink,
            state: false,
        };
        write_attr(&output.node.join("period"), &period_ns.to_string())?;
        output.drive(false)?;
        write_attr(&output.node.join("enable"), "1")?;
        Ok(output)
    }

    fn drive(&self, level: bool) -> Result<(), DeviceError> {
        let duty = if level { self.duty_on_ns } else { self.duty_off_ns };
        write_attr(&self.node.join("duty_cycle"), &duty.to_string())
    }
}

/// Closed set of supported output devices.
#[derive(Debug)]
pub enum OutputDevice {
    Digital(DigitalOutput),
    Pwm(PwmOutput),
}

impl OutputDevice {
    /// Export and initialize the device described by `spec`, leaving it OFF.
    pub fn open(sysfs_root: &Path, spec: &DeviceSpec) -> Result<Self, DeviceError> {
        let device = match *spec {
            DeviceSpec::Digital { pin, blink } => {
                OutputDevice::Digital(DigitalOutput::open(sysfs_root, pin, blink)?)
            }
            DeviceSpec::Pwm {
                chip,
                channel,
                frequency,
                duty_on,
                duty_off,
                blink,
            } => OutputDevice::Pwm(PwmOutput::open(
                sysfs_root, chip, channel, frequency, duty_on, duty_off, blink,
            )?),
        };
        tracing::info!(device = %device.label(), blink = device.is_blink_capable(), "output device ready");
        Ok(device)
    }

    /// Human-readable identifier for logs.
    pub fn label(&self) -> String {
        match self {
            OutputDevice::Digital(d) => format!("gpio{}", d.pin),
            OutputDevice::Pwm(p) => format!("pwmchip{}/pwm{}", p.chip, p.channel),
        }
    }

    /// Last commanded steady state.
    pub fn state(&self) -> bool {
        match self {
            OutputDevice::Digital(d) => d.state,
            OutputDevice::Pwm(p) => p.state,
        }
    }

    pub fn is_blink_capable(&self) -> bool {
        match self {
            OutputDevice::Digital(d) => d.blink,
            OutputDevice::Pwm(p) => p.blink,
        }
    }

    /// Command a steady state. Returns whether hardware was written; a
    /// repeat of the current state writes nothing.
    pub fn set_state(&mut self, on: bool) -> Result<bool, DeviceError> {
        if self.state() == on {
            return Ok(false);
        }
        self.drive(on)?;
        match self {
            OutputDevice::Digital(d) => d.state = on,
            OutputDevice::Pwm(p) => p.state = on,
        }
        Ok(true)
    }

    /// Drive the hardware level without changing the steady state.
    pub fn drive(&self, level: bool) -> Result<(), DeviceError> {
        match self {
            OutputDevice::Digital(d) => d.drive(level),
            OutputDevice::Pwm(p) => p.drive(level),
        }
    }

    /// Put the hardware back to the steady state.
    pub fn restore(&self) -> Result<(), DeviceError> {
        self.drive(self.state())
    }
}
