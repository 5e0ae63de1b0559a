//! Fan-out of steady-state and blink commands to every configured output.

use crate::devices::{DeviceError, DeviceSpec};
use crate::output::OutputDevice;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Half-period of the warning blink.
pub const BLINK_PERIOD: Duration = Duration::from_millis(250);

struct Outputs {
    devices: Vec<OutputDevice>,
    /// Generation of the blink thread allowed to drive, if any.
    blink: Option<u64>,
    generation: u64,
}

/// Dropping the sender wakes the blink thread, which then exits on its own.
struct Blinker {
    _stop: mpsc::Sender<()>,
}

/// Owns the output devices. Hardware write failures are logged per device
/// and never stop the remaining devices from being driven.
pub struct OutputGateway {
    outputs: Arc<Mutex<Outputs>>,
    blinker: Mutex<Option<Blinker>>,
    blink_period: Duration,
}

impl OutputGateway {
    pub fn new(devices: Vec<OutputDevice>) -> Self {
        Self::with_blink_period(devices, BLINK_PERIOD)
    }

    pub fn with_blink_period(devices: Vec<OutputDevice>, blink_period: Duration) -> Self {
        Self {
            outputs: Arc::new(Mutex::new(Outputs {
                devices,
                blink: None,
                generation: 0,
            })),
            blinker: Mutex::new(None),
            blink_period,
        }
    }

    /// Open every device in `specs` under `sysfs_root`. Fails on the first
    /// device that cannot be initialized.
    pub fn open(sysfs_root: &Path, specs: &[DeviceSpec]) -> Result<Self, DeviceError> {
        let devices = specs
            .iter()
            .map(|spec| OutputDevice::open(sysfs_root, spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(devices))
    }

    fn outputs(&self) -> MutexGuard<'_, Outputs> {
        self.outputs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.outputs().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last commanded steady state of each device, in configuration order.
    pub fn states(&self) -> Vec<bool> {
        self.outputs().devices.iter().map(OutputDevice::state).collect()
    }

    pub fn is_blinking(&self) -> bool {
        self.outputs().blink.is_some()
    }

    /// Command every device to `on`. Devices already there are not written.
    pub fn set_state(&self, on: bool) {
        let mut outputs = self.outputs();
        let mut written = 0usize;
        for device in outputs.devices.iter_mut() {
            match device.set_state(on) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(device = %device.label(), error = %e, "output write failed")
                }
            }
        }
        if written > 0 {
            tracing::debug!(on, devices = written, "output state changed");
        }
    }

    /// Start or stop the warning blink on blink-capable devices. Stopping
    /// restores every device to its steady state and does not wait for the
    /// blink thread, so it is safe to call from async code.
    pub fn set_blink(&self, enabled: bool) {
        let mut blinker = self.blinker.lock().unwrap_or_else(|e| e.into_inner());
        if enabled {
            if blinker.is_none() {
                *blinker = self.spawn_blinker();
            }
            return;
        }

        if blinker.take().is_none() {
            return;
        }
        let mut outputs = self.outputs();
        outputs.blink = None;
        for device in &outputs.devices {
            if let Err(e) = device.restore() {
                tracing::warn!(device = %device.label(), error = %e, "restore after blink failed");
            }
        }
        tracing::debug!("blink stopped");
    }

    fn spawn_blinker(&self) -> Option<Blinker> {
        let generation = {
            let mut outputs = self.outputs();
            outputs.generation += 1;
            outputs.blink = Some(outputs.generation);
            outputs.generation
        };
        let outputs = Arc::clone(&self.outputs);
        let period = self.blink_period;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let spawned = std::thread::Builder::new()
            .name("warden-blink".into())
            .spawn(move || {
                let mut inverted = false;
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let outputs = outputs.lock().unwrap_or_else(|e| e.into_inner());
                    // Checked under the lock so nothing is driven after a restore
                    // or by a superseded blink.
                    if outputs.blink != Some(generation) {
                        break;
                    }
                    inverted = !inverted;
                    for device in outputs.devices.iter().filter(|d| d.is_blink_capable()) {
                        if let Err(e) = device.drive(device.state() ^ inverted) {
                            tracing::warn!(device = %device.label(), error = %e, "blink write failed");
                        }
                    }
                }
            });

        match spawned {
            Ok(_) => {
                tracing::debug!(period_ms = period.as_millis() as u64, generation, "blink started");
                Some(Blinker { _stop: stop_tx })
            }
            Err(e) => {
                self.outputs().blink = None;
                tracing::warn!(error = %e, "failed to spawn blink thread; continuing without warning blink");
                None
            }
        }
    }

    /// Stop blinking and leave every device OFF.
    pub fn shutdown(&self) {
        self.set_blink(false);
        self.set_state(false);
        tracing::info!(devices = self.len(), "outputs released");
    }
}

impl Drop for OutputGateway {
    fn drop(&mut self) {
        self.set_blink(false);
    }
}
