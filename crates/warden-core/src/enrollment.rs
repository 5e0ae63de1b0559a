//! Enrollment session: collects single-face crops between `begin` and
//! `finish` so they can be handed to the recognizer store in one batch.

use crate::imaging;
use crate::types::FaceRegion;
use image::GrayImage;

#[derive(Default)]
pub struct EnrollmentSession {
    buffer: Option<Vec<GrayImage>>,
}

impl EnrollmentSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting. An unfinished previous buffer is discarded.
    pub fn begin(&mut self) {
        if let Some(old) = self.buffer.replace(Vec::new()) {
            tracing::debug!(discarded = old.len(), "restarted enrollment session");
        }
    }

    pub fn is_active(&self) -> bool {
        self.buffer.is_some()
    }

    /// Crops collected so far (0 when inactive).
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer this tick's frame and detected regions. Only a tick with
    /// exactly one region adds its (unequalized) crop; returns whether a crop
    /// was kept.
    pub fn offer(&mut self, frame: &GrayImage, regions: &[FaceRegion]) -> bool {
        let Some(buffer) = self.buffer.as_mut() else {
            return false;
        };
        let [region] = regions else {
            tracing::trace!(faces = regions.len(), "enrollment tick skipped");
            return false;
        };
        match imaging::crop(frame, region) {
            Some(face) => {
                buffer.push(face);
                true
            }
            None => false,
        }
    }

    /// Hand over the collected crops and end the session. Empty when no
    /// session was active.
    pub fn finish(&mut self) -> Vec<GrayImage> {
        self.buffer.take().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| image::Luma([(x + y) as u8]))
    }

    fn face() -> FaceRegion {
        FaceRegion::new(10, 10, 20, 20)
    }

    #[test]
    fn test_collects_only_single_face_ticks() {
        let mut session = EnrollmentSession::new();
        session.begin();
        for _ in 0..3 {
            assert!(session.offer(&frame(), &[face()]));
        }
        assert_eq!(session.len(), 3);

        assert!(!session.offer(&frame(), &[face(), FaceRegion::new(40, 40, 10, 10)]));
        assert!(!session.offer(&frame(), &[]));
        assert_eq!(session.len(), 3);

        let crops = session.finish();
        assert_eq!(crops.len(), 3);
        assert_eq!(crops[0].dimensions(), (20, 20));
        // Raw grayscale: top-left pixel of the crop is frame(10, 10).
        assert_eq!(crops[0].get_pixel(0, 0)[0], 20);
        assert!(!session.is_active());
        assert!(session.finish().is_empty());
    }

    #[test]
    fn test_inactive_session_ignores_faces() {
        let mut session = EnrollmentSession::new();
        assert!(!session.offer(&frame(), &[face()]));
        assert!(session.is_empty());
        assert!(session.finish().is_empty());
    }

    #[test]
    fn test_begin_discards_previous_buffer() {
        let mut session = EnrollmentSession::new();
        session.begin();
        session.offer(&frame(), &[face()]);
        session.offer(&frame(), &[face()]);
        session.begin();
        assert!(session.is_active());
        assert_eq!(session.len(), 0);
        session.offer(&frame(), &[face()]);
        assert_eq!(session.finish().len(), 1);
    }
}
