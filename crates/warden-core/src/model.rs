//! Trainable face model contract.

use crate::codec::DecodeError;
use crate::types::Prediction;
use image::GrayImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("face crop {width}x{height} is too small for the model (minimum {min_width}x{min_height})")]
    FaceTooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("invalid model parameters: {0}")]
    InvalidParams(String),
    #[error("model already trained; use update")]
    AlreadyTrained,
    #[error("model not trained; use train")]
    NotTrained,
    #[error("corrupt model blob: {0}")]
    Corrupt(#[from] DecodeError),
}

/// A statistical face model mapping face crops to integer labels.
///
/// Implementations keep every label they were given; the recognizer store
/// relies on `labels` to check its identity list against the model.
pub trait FaceModel: Send + Sync {
    fn is_trained(&self) -> bool;

    /// Fit the model from scratch with a single label's samples.
    fn train(&mut self, faces: &[GrayImage], label: u32) -> Result<(), ModelError>;

    /// Add samples for `label` without revisiting earlier training data.
    fn update(&mut self, faces: &[GrayImage], label: u32) -> Result<(), ModelError>;

    /// Nearest label and its distance, or `None` if the model cannot score
    /// this crop (untrained, crop too small).
    fn predict(&self, face: &GrayImage) -> Option<Prediction>;

    /// Distinct labels the model knows, ascending.
    fn labels(&self) -> Vec<u32>;

    fn label_count(&self) -> usize {
        self.labels().len()
    }

    /// Serialize into an opaque blob.
    fn encode(&self) -> Vec<u8>;
}
