//! warden-hw: Hardware abstraction for camera capture and output devices.
//!
//! Provides V4L2-based camera access and sysfs GPIO/PWM outputs behind a
//! single fan-out gateway with a warning blink.

pub mod camera;
pub mod devices;
pub mod frame;
pub mod gateway;
pub mod output;

pub use camera::{Camera, CameraError, PixelFormat};
pub use devices::{DeviceError, DeviceSpec};
pub use frame::Frame;
pub use gateway::OutputGateway;
pub use output::OutputDevice;
