//! Grayscale helpers shared by the capture cycle and the face model:
//! region crops, histogram equalization, brightness statistics.

use crate::types::FaceRegion;
use image::GrayImage;

/// Copy the pixels under `region` out of `frame`.
///
/// The region is clamped to the frame first; `None` if nothing remains.
pub fn crop(frame: &GrayImage, region: &FaceRegion) -> Option<GrayImage> {
    let r = region.clamp_to(frame.width(), frame.height())?;
    Some(image::imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image())
}

/// Global histogram equalization in-place.
///
/// Builds the cumulative histogram and remaps every pixel so the output
/// spans the full 0–255 range. Uniform images are left unchanged.
pub fn equalize(img: &mut GrayImage) {
    let total = img.as_raw().len();
    if total == 0 {
        return;
    }

    let mut hist = [0u32; 256];
    for &p in img.as_raw() {
        hist[p as usize] += 1;
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }

    let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
    let denom = total as u32 - cdf_min;
    if denom == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        let scaled = (cdf[i].saturating_sub(cdf_min)) as f32 / denom as f32 * 255.0;
        *v = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for p in img.iter_mut() {
        *p = lut[*p as usize];
    }
}

/// Equalized copy of a crop, the form the face model sees at recognition time.
pub fn equalized(img: &GrayImage) -> GrayImage {
    let mut out = img.clone();
    equalize(&mut out);
    out
}

/// True when more than `threshold_pct` of pixels fall in the darkest
/// bucket (0–31). An empty buffer counts as dark.
pub fn is_dark(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

/// Population standard deviation of pixel intensity.
pub fn stddev(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 0.0;
    }
    let n = gray.len() as f32;
    let mean = gray.iter().map(|&b| b as f32).sum::<f32>() / n;
    let variance = gray.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}
