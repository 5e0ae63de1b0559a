//! Test doubles shared by the unit tests of this crate.

use crate::model::{FaceModel, ModelError};
use crate::pipeline::{Actuator, CaptureError, DetectorError, FaceDetector, FrameSource};
use crate::types::{FaceRegion, Prediction};
use image::GrayImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Answers keyed on the first pixel of the query crop.
pub(crate) struct KeyedModel {
    answers: Vec<(u8, Prediction)>,
    labels: Vec<u32>,
}

impl KeyedModel {
    pub(crate) fn new(answers: &[(u8, u32, f64)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|&(key, label, distance)| (key, Prediction { label, distance }))
                .collect(),
            labels: Vec::new(),
        }
    }
}

impl FaceModel for KeyedModel {
    fn is_trained(&self) -> bool {
        !self.labels.is_empty()
    }
    fn train(&mut self, _faces: &[GrayImage], label: u32) -> Result<(), ModelError> {
        self.labels.push(label);
        Ok(())
    }
    fn update(&mut self, _faces: &[GrayImage], label: u32) -> Result<(), ModelError> {
        self.labels.push(label);
        Ok(())
    }
    fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        let key = face.as_raw()[0];
        self.answers.iter().find(|(k, _)| *k == key).map(|(_, p)| *p)
    }
    fn labels(&self) -> Vec<u32> {
        let mut labels = self.labels.clone();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Yields one queued frame per grab, then `Ok(None)`. Counts grabs and
/// flags when it is dropped.
pub(crate) struct ScriptedSource {
    frames: VecDeque<Option<GrayImage>>,
    pub(crate) grabs: Arc<AtomicUsize>,
    pub(crate) released: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub(crate) fn new(frames: impl IntoIterator<Item = Option<GrayImage>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            grabs: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn push(&mut self, frame: Option<GrayImage>) {
        self.frames.push_back(frame);
    }
}

impl FrameSource for ScriptedSource {
    fn grab(&mut self) -> Result<Option<GrayImage>, CaptureError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);
        Ok(self.frames.pop_front().flatten())
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Reports the same regions for every frame until changed.
pub(crate) struct FixedDetector {
    pub(crate) regions: Vec<FaceRegion>,
}

impl FaceDetector for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError> {
        Ok(self.regions.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    State(bool),
    Blink(bool),
}

#[derive(Default)]
pub(crate) struct RecordingActuator {
    commands: Mutex<Vec<Command>>,
}

impl RecordingActuator {
    pub(crate) fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }
}

impl Actuator for RecordingActuator {
    fn set_state(&self, on: bool) {
        self.commands.lock().unwrap().push(Command::State(on));
    }

    fn set_blink(&self, enabled: bool) {
        self.commands.lock().unwrap().push(Command::Blink(enabled));
    }
}

/// Uniform frame whose face crops all key to `value` in [`KeyedModel`].
pub(crate) fn uniform_frame(value: u8) -> GrayImage {
    GrayImage::from_pixel(64, 64, image::Luma([value]))
}
