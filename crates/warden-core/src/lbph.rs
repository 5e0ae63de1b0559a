//! Local Binary Pattern Histogram face model.
//!
//! Each training crop is reduced to a grid of per-cell LBP code histograms.
//! Prediction is nearest-neighbor over every stored sample using the
//! chi-square distance, so adding a new label is just appending samples:
//! earlier training data is never revisited.
//!
//! With the default 8x8 grid the distance ranges 0–256; identical crops
//! score 0 and unrelated textures land well above 100.

use crate::codec::{DecodeError, Reader, Writer};
use crate::model::{FaceModel, ModelError};
use crate::types::Prediction;
use image::GrayImage;
use std::collections::BTreeSet;

const LBPH_MAGIC: &[u8; 4] = b"LBPH";
const LBPH_VERSION: u16 = 1;
const LBPH_MAX_NEIGHBORS: u32 = 16;
const LBPH_MAX_RADIUS: u32 = 64;
const LBPH_MAX_GRID: u32 = 64;
/// Interpolated neighbors this close to the center count as "not darker".
const LBP_TOLERANCE: f32 = 1e-3;

/// Operator and grid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    fn validate(&self) -> Result<(), ModelError> {
        if self.radius == 0 || self.radius > LBPH_MAX_RADIUS {
            return Err(ModelError::InvalidParams(format!(
                "radius must be 1..={LBPH_MAX_RADIUS}, got {}",
                self.radius
            )));
        }
        if self.neighbors == 0 || self.neighbors > LBPH_MAX_NEIGHBORS {
            return Err(ModelError::InvalidParams(format!(
                "neighbors must be 1..={LBPH_MAX_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if !(1..=LBPH_MAX_GRID).contains(&self.grid_x) || !(1..=LBPH_MAX_GRID).contains(&self.grid_y) {
            return Err(ModelError::InvalidParams(format!(
                "grid must be 1x1..={LBPH_MAX_GRID}x{LBPH_MAX_GRID}, got {}x{}",
                self.grid_x, self.grid_y
            )));
        }
        Ok(())
    }

    fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    /// `None` for parameters that did not pass [`validate`](Self::validate).
    fn histogram_len(&self) -> Option<usize> {
        let cells = (self.grid_x as usize).checked_mul(self.grid_y as usize)?;
        self.bins().checked_mul(cells)
    }

    /// Smallest crop that yields at least one LBP code per grid cell.
    pub fn min_face_size(&self) -> (u32, u32) {
        let border = self.radius.saturating_mul(2);
        (
            border.saturating_add(self.grid_x),
            border.saturating_add(self.grid_y),
        )
    }
}

#[derive(Debug)]
struct Sample {
    label: u32,
    histogram: Vec<f32>,
}

#[derive(Debug)]
pub struct LbphModel {
    params: LbphParams,
    samples: Vec<Sample>,
    labels: BTreeSet<u32>,
}

impl Default for LbphModel {
    fn default() -> Self {
        Self {
            params: LbphParams::default(),
            samples: Vec::new(),
            labels: BTreeSet::new(),
        }
    }
}

impl LbphModel {
    pub fn new(params: LbphParams) -> Result<Self, ModelError> {
        params.validate()?;
        Ok(Self {
            params,
            samples: Vec::new(),
            labels: BTreeSet::new(),
        })
    }

    pub fn params(&self) -> LbphParams {
        self.params
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Inverse of [`FaceModel::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ModelError> {
        let (mut r, version) = Reader::open(bytes, LBPH_MAGIC)?;
        if version != LBPH_VERSION {
            return Err(DecodeError::UnsupportedVersion(version).into());
        }

        let params = LbphParams {
            radius: r.u32()?,
            neighbors: r.u32()?,
            grid_x: r.u32()?,
            grid_y: r.u32()?,
        };
        params
            .validate()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let expected_len = params
            .histogram_len()
            .ok_or_else(|| DecodeError::Malformed("histogram size overflows".into()))?;
        let count = r.u32()? as usize;
        let mut model = Self::new(params)?;

        for idx in 0..count {
            let label = r.u32()?;
            let len = r.u32()? as usize;
            if len != expected_len {
                return Err(DecodeError::Malformed(format!(
                    "sample {idx}: histogram length {len}, expected {expected_len}"
                ))
                .into());
            }
            if len.saturating_mul(4) > r.remaining() {
                return Err(DecodeError::Malformed(format!(
                    "sample {idx}: histogram of {len} bins exceeds remaining {} bytes",
                    r.remaining()
                ))
                .into());
            }
            let mut histogram = Vec::with_capacity(len);
            for _ in 0..len {
                histogram.push(r.f32()?);
            }
            model.labels.insert(label);
            model.samples.push(Sample { label, histogram });
        }
        r.expect_end()?;

        Ok(model)
    }

    fn histogram(&self, face: &GrayImage) -> Result<Vec<f32>, ModelError> {
        let (min_width, min_height) = self.params.min_face_size();
        let (width, height) = face.dimensions();
        if width < min_width || height < min_height {
            return Err(ModelError::FaceTooSmall {
                width,
                height,
                min_width,
                min_height,
            });
        }
        let (codes, code_w, code_h) = lbp_codes(face, self.params.radius, self.params.neighbors);
        Ok(spatial_histogram(
            &codes,
            code_w,
            code_h,
            self.params.bins(),
            self.params.grid_x as usize,
            self.params.grid_y as usize,
        ))
    }

    fn add_samples(&mut self, faces: &[GrayImage], label: u32) -> Result<(), ModelError> {
        if faces.is_empty() {
            return Err(ModelError::InvalidParams("no training samples".into()));
        }
        // Compute everything first so a bad crop leaves the model untouched.
        let histograms = faces
            .iter()
            .map(|face| self.histogram(face))
            .collect::<Result<Vec<_>, _>>()?;

        self.samples.extend(
            histograms
                .into_iter()
                .map(|histogram| Sample { label, histogram }),
        );
        self.labels.insert(label);
        Ok(())
    }
}

impl FaceModel for LbphModel {
    fn is_trained(&self) -> bool {
        !self.samples.is_empty()
    }

    fn train(&mut self, faces: &[GrayImage], label: u32) -> Result<(), ModelError> {
        if self.is_trained() {
            return Err(ModelError::AlreadyTrained);
        }
        self.add_samples(faces, label)
    }

    fn update(&mut self, faces: &[GrayImage], label: u32) -> Result<(), ModelError> {
        if !self.is_trained() {
            return Err(ModelError::NotTrained);
        }
        self.add_samples(faces, label)
    }

    fn predict(&self, face: &GrayImage) -> Option<Prediction> {
        let query = match self.histogram(face) {
            Ok(h) => h,
            Err(e) => {
                tracing::trace!(error = %e, "crop rejected by LBPH model");
                return None;
            }
        };

        let mut best: Option<Prediction> = None;
        for sample in &self.samples {
            let distance = chi_square(&sample.histogram, &query);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Prediction {
                    label: sample.label,
                    distance,
                });
            }
        }
        best
    }

    fn labels(&self) -> Vec<u32> {
        self.labels.iter().copied().collect()
    }

    fn label_count(&self) -> usize {
        self.labels.len()
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new(LBPH_MAGIC, LBPH_VERSION);
        w.u32(self.params.radius);
        w.u32(self.params.neighbors);
        w.u32(self.params.grid_x);
        w.u32(self.params.grid_y);
        w.u32(self.samples.len() as u32);
        for sample in &self.samples {
            w.u32(sample.label);
            w.u32(sample.histogram.len() as u32);
            for &v in &sample.histogram {
                w.f32(v);
            }
        }
        w.finish()
    }
}

/// Circular LBP operator with bilinear interpolation of the sampling points.
///
/// Returns the code image and its dimensions (input shrunk by `radius` on
/// every side).
fn lbp_codes(face: &GrayImage, radius: u32, neighbors: u32) -> (Vec<u32>, usize, usize) {
    let (width, height) = face.dimensions();
    let r = radius as usize;
    let w = width as usize;
    let h = height as usize;
    let out_w = w - 2 * r;
    let out_h = h - 2 * r;
    let src = face.as_raw();
    let mut codes = vec![0u32; out_w * out_h];

    for n in 0..neighbors {
        let angle = 2.0 * std::f32::consts::PI * n as f32 / neighbors as f32;
        let x = radius as f32 * angle.cos();
        let y = -(radius as f32) * angle.sin();

        let fx = x.floor() as isize;
        let fy = y.floor() as isize;
        let cx = x.ceil() as isize;
        let cy = y.ceil() as isize;
        let tx = x - fx as f32;
        let ty = y - fy as f32;

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for i in r..h - r {
            for j in r..w - r {
                let at = |dy: isize, dx: isize| {
                    let yy = (i as isize + dy) as usize;
                    let xx = (j as isize + dx) as usize;
                    src[yy * w + xx] as f32
                };
                let t = w1 * at(fy, fx) + w2 * at(fy, cx) + w3 * at(cy, fx) + w4 * at(cy, cx);
                let center = src[i * w + j] as f32;
                if t > center || (t - center).abs() < LBP_TOLERANCE * center.max(1.0) {
                    codes[(i - r) * out_w + (j - r)] |= 1 << n;
                }
            }
        }
    }

    (codes, out_w, out_h)
}

/// Concatenated per-cell histograms, each normalized to sum to 1.
fn spatial_histogram(
    codes: &[u32],
    width: usize,
    height: usize,
    bins: usize,
    grid_x: usize,
    grid_y: usize,
) -> Vec<f32> {
    let cell_w = width / grid_x;
    let cell_h = height / grid_y;
    let cell_pixels = (cell_w * cell_h) as f32;
    let mut out = vec![0f32; bins * grid_x * grid_y];

    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let base = (gy * grid_x + gx) * bins;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    out[base + codes[y * width + x] as usize] += 1.0;
                }
            }
            for v in &mut out[base..base + bins] {
                *v /= cell_pixels;
            }
        }
    }

    out
}

/// Symmetric chi-square distance: 2 * sum((a - b)^2 / (a + b)).
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    let mut sum = 0.0f64;
    for (&p, &q) in a.iter().zip(b.iter()) {
        let denom = (p + q) as f64;
        if denom > f64::EPSILON {
            let diff = (p - q) as f64;
            sum += diff * diff / denom;
        }
    }
    2.0 * sum
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> GrayImage {
        GrayImage::from_pixel(32, 32, image::Luma([value]))
    }

    fn checker(cell: u32) -> GrayImage {
        GrayImage::from_fn(32, 32, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                image::Luma([30])
            } else {
                image::Luma([220])
            }
        })
    }

    fn gradient() -> GrayImage {
        GrayImage::from_fn(32, 32, |x, _| image::Luma([(x * 7) as u8]))
    }

    #[test]
    fn test_identical_crop_has_zero_distance() {
        let mut model = LbphModel::default();
        model.train(&[checker(2)], 0).unwrap();
        let p = model.predict(&checker(2)).unwrap();
        assert_eq!(p.label, 0);
        assert!(p.distance.abs() < 1e-9, "distance {}", p.distance);
    }

    #[test]
    fn test_distinct_textures_are_far_apart() {
        let mut model = LbphModel::default();
        model.train(&[flat(120)], 0).unwrap();
        let p = model.predict(&gradient()).unwrap();
        assert!(p.distance > 100.0, "distance {}", p.distance);
    }

    #[test]
    fn test_update_adds_label_without_retraining() {
        let mut model = LbphModel::default();
        model.train(&[flat(120), flat(90)], 0).unwrap();
        model.update(&[checker(1)], 1).unwrap();
        assert_eq!(model.label_count(), 2);
        assert_eq!(model.sample_count(), 3);
        assert_eq!(model.predict(&checker(1)).unwrap().label, 1);
        assert_eq!(model.predict(&flat(60)).unwrap().label, 0);
    }

    #[test]
    fn test_train_twice_rejected() {
        let mut model = LbphModel::default();
        model.train(&[flat(10)], 0).unwrap();
        assert!(matches!(model.train(&[flat(10)], 1), Err(ModelError::AlreadyTrained)));
    }

    #[test]
    fn test_update_untrained_rejected() {
        let mut model = LbphModel::default();
        assert!(matches!(model.update(&[flat(10)], 0), Err(ModelError::NotTrained)));
    }

    #[test]
    fn test_too_small_crop_leaves_model_untouched() {
        let mut model = LbphModel::default();
        let tiny = GrayImage::new(5, 5);
        let err = model.train(&[flat(10), tiny], 0).unwrap_err();
        assert!(matches!(err, ModelError::FaceTooSmall { .. }));
        assert!(!model.is_trained());
        assert!(model.predict(&flat(10)).is_none());
    }

    #[test]
    fn test_encode_decode_preserves_predictions() {
        let mut model = LbphModel::default();
        model.train(&[flat(120)], 0).unwrap();
        model.update(&[checker(1), checker(2)], 1).unwrap();

        let restored = LbphModel::decode(&model.encode()).unwrap();
        assert_eq!(restored.label_count(), 2);
        assert_eq!(restored.params(), model.params());
        for query in [flat(40), checker(1), checker(3)] {
            assert_eq!(restored.predict(&query), model.predict(&query));
        }
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let mut model = LbphModel::default();
        model.train(&[flat(120)], 0).unwrap();
        let bytes = model.encode();
        let err = LbphModel::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, ModelError::Corrupt(DecodeError::Truncated { .. })));
    }

    fn blob_with(params: LbphParams) -> Vec<u8> {
        let mut w = Writer::new(LBPH_MAGIC, LBPH_VERSION);
        w.u32(params.radius);
        w.u32(params.neighbors);
        w.u32(params.grid_x);
        w.u32(params.grid_y);
        w.u32(0);
        w.finish()
    }

    #[test]
    fn test_decode_rejects_oversized_grid() {
        let bytes = blob_with(LbphParams {
            grid_x: 70_000,
            grid_y: 70_000,
            ..LbphParams::default()
        });
        let err = LbphModel::decode(&bytes).unwrap_err();
        assert!(matches!(err, ModelError::Corrupt(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_oversized_radius() {
        let bytes = blob_with(LbphParams {
            radius: 0x8000_0000,
            ..LbphParams::default()
        });
        let err = LbphModel::decode(&bytes).unwrap_err();
        assert!(matches!(err, ModelError::Corrupt(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_histogram_longer_than_blob() {
        let mut w = Writer::new(LBPH_MAGIC, LBPH_VERSION);
        let params = LbphParams {
            neighbors: 16,
            grid_x: 64,
            grid_y: 64,
            ..LbphParams::default()
        };
        for v in [params.radius, params.neighbors, params.grid_x, params.grid_y] {
            w.u32(v);
        }
        w.u32(1);
        w.u32(0);
        w.u32(params.histogram_len().unwrap() as u32);
        let err = LbphModel::decode(&w.finish()).unwrap_err();
        assert!(matches!(err, ModelError::Corrupt(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_invalid_params() {
        let params = LbphParams {
            neighbors: 17,
            ..LbphParams::default()
        };
        assert!(LbphModel::new(params).is_err());
        let params = LbphParams {
            radius: LBPH_MAX_RADIUS + 1,
            ..LbphParams::default()
        };
        assert!(LbphModel::new(params).is_err());
    }
}
