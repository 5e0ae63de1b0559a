use serde::{Deserialize, Serialize};

/// An enrolled person. Position in the recognizer's identity list is the
/// recognition label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub authorized: bool,
}

impl Identity {
    pub fn new(name: impl Into<String>, authorized: bool) -> Self {
        Self {
            name: name.into(),
            authorized,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, authorized: {}", self.name, self.authorized)
    }
}

/// Pixel rectangle of a detected face within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersect with a `width` x `height` frame. Returns `None` when nothing
    /// of the region lies inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRegion> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRegion::new(self.x, self.y, w, h))
    }
}

/// Nearest-label answer from a face model. Lower distance = closer match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    pub distance: f64,
}

/// Per-region recognition result.
///
/// `Unrecognized` is a shared sentinel: it carries no identity and reports a
/// confidence of `0` regardless of how far the nearest enrolled face was.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Detection {
    Recognized { identity: Identity, confidence: f64 },
    Unrecognized,
}

impl Detection {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Detection::Recognized { identity, .. } => Some(identity),
            Detection::Unrecognized => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Detection::Recognized { confidence, .. } => *confidence,
            Detection::Unrecognized => 0.0,
        }
    }

    /// True when this detection names an identity that may trigger the output.
    pub fn is_authorized(&self) -> bool {
        self.identity().is_some_and(|identity| identity.authorized)
    }
}

impl std::fmt::Display for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Detection::Recognized {
                identity,
                confidence,
            } => write!(f, "{identity}. Confidence: {confidence:.2}"),
            Detection::Unrecognized => write!(f, "Unrecognized, authorized: false. Confidence: 0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_reports_zero_confidence() {
        assert_eq!(Detection::Unrecognized.confidence(), 0.0);
        assert!(Detection::Unrecognized.identity().is_none());
        assert!(!Detection::Unrecognized.is_authorized());
    }

    #[test]
    fn test_recognized_unauthorized_does_not_authorize() {
        let det = Detection::Recognized {
            identity: Identity::new("visitor", false),
            confidence: 12.0,
        };
        assert!(!det.is_authorized());
        assert_eq!(det.identity().map(|i| i.name.as_str()), Some("visitor"));
    }

    #[test]
    fn test_region_clamped_to_frame() {
        let region = FaceRegion::new(600, 400, 100, 100);
        assert_eq!(region.clamp_to(640, 480), Some(FaceRegion::new(600, 400, 40, 80)));
    }

    #[test]
    fn test_region_outside_frame() {
        assert_eq!(FaceRegion::new(640, 0, 10, 10).clamp_to(640, 480), None);
        assert_eq!(FaceRegion::new(0, 0, 0, 10).clamp_to(640, 480), None);
    }
}
