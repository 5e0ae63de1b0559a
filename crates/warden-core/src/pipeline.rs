//! Contracts between the capture cycle and its collaborators: the frame
//! source, the vision pipeline, the actuation gateway, and passive viewers.

use crate::types::{Detection, FaceRegion};
use image::GrayImage;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture failed: {0}")]
    Failed(String),
    #[error("device disconnected: {0}")]
    Disconnected(String),
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    Failed(String),
}

/// Blocking supplier of grayscale frames.
pub trait FrameSource: Send {
    /// Wait for the next frame. `Ok(None)` means nothing usable this tick.
    fn grab(&mut self) -> Result<Option<GrayImage>, CaptureError>;
}

/// Face region detector (the vision pipeline).
///
/// Region order is detector-defined and only used to align regions with
/// their recognition results within one tick.
pub trait FaceDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Output side of the controller. Implementations fan out to hardware and
/// must tolerate repeated identical commands.
pub trait Actuator: Send + Sync {
    fn set_state(&self, on: bool);

    fn set_blink(&self, enabled: bool);
}

/// What one capture tick saw.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub frame_width: u32,
    pub frame_height: u32,
    pub regions: Vec<FaceRegion>,
    /// Positionally aligned with `regions`.
    pub detections: Vec<Detection>,
}

/// Passive consumer of tick results (preview, IPC status). Called on the
/// capture thread; must not block.
pub trait DetectionObserver: Send + Sync {
    fn observe(&self, report: &TickReport);
}
