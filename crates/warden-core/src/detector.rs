//! Fixed-position presence detector.
//!
//! For a door-mounted camera the face of whoever stands at the entry falls
//! inside a known window. This detector reports that window as a face
//! region whenever it is lit and textured enough to hold one, and nothing
//! for dark or featureless frames.

use crate::imaging;
use crate::pipeline::{DetectorError, FaceDetector};
use crate::types::FaceRegion;
use image::GrayImage;

const PRESENCE_DARK_THRESHOLD: f32 = 0.95;
const PRESENCE_MIN_CONTRAST: f32 = 12.0;
/// Side of the default centered window relative to the shorter frame edge.
const PRESENCE_DEFAULT_SCALE: f32 = 0.6;

pub struct PresenceDetector {
    region: Option<FaceRegion>,
}

impl PresenceDetector {
    /// `region` of `None` uses a centered square covering 60% of the
    /// shorter frame edge.
    pub fn new(region: Option<FaceRegion>) -> Self {
        Self { region }
    }

    fn window(&self, width: u32, height: u32) -> FaceRegion {
        if let Some(region) = self.region {
            return region;
        }
        let side = (width.min(height) as f32 * PRESENCE_DEFAULT_SCALE).round() as u32;
        FaceRegion::new((width - side) / 2, (height - side) / 2, side, side)
    }
}

impl FaceDetector for PresenceDetector {
    fn name(&self) -> &'static str {
        "presence"
    }

    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let window = self.window(frame.width(), frame.height());
        let Some(window) = window.clamp_to(frame.width(), frame.height()) else {
            return Err(DetectorError::Failed(format!(
                "window {window:?} lies outside {}x{} frame",
                frame.width(),
                frame.height()
            )));
        };
        let Some(crop) = imaging::crop(frame, &window) else {
            return Ok(Vec::new());
        };

        if imaging::is_dark(crop.as_raw(), PRESENCE_DARK_THRESHOLD) {
            return Ok(Vec::new());
        }
        let contrast = imaging::stddev(crop.as_raw());
        if contrast < PRESENCE_MIN_CONTRAST {
            tracing::trace!(contrast, "presence window featureless");
            return Ok(Vec::new());
        }

        Ok(vec![window])
    }
}
