//! warden-core: Face-gated access control engine.
//!
//! Runs a fixed-rate capture cycle that recognizes faces with an LBPH model
//! and drives an output through a hysteresis state machine with a delayed,
//! blink-warned disable. Hardware stays behind the traits in [`pipeline`].

pub mod authorization;
pub mod codec;
pub mod controller;
pub mod detector;
pub mod enrollment;
pub mod imaging;
pub mod lbph;
pub mod model;
pub mod pipeline;
pub mod recognizer;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use authorization::{AuthorizationConfig, AuthorizationState};
pub use controller::{Controller, ControllerConfig, ControllerStatus};
pub use pipeline::{Actuator, DetectionObserver, FaceDetector, FrameSource, TickReport};
pub use recognizer::{RecognizerStore, StoreError};
pub use scheduler::CaptureScheduler;
pub use types::{Detection, FaceRegion, Identity};
