//! Recognizer store: enrolled identities plus the face model that maps
//! crops onto them.
//!
//! Label `i` always denotes `identities[i]`. Labels are handed out in
//! enrollment order and never reused, so the identity list and the model
//! can be saved and reloaded independently and re-joined by position.

use crate::codec::{DecodeError, Reader, Writer};
use crate::lbph::LbphModel;
use crate::model::{FaceModel, ModelError};
use crate::types::{Detection, Identity};
use image::GrayImage;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, TryLockError};
use thiserror::Error;

/// Model blob inside a recognizer directory.
pub const MODEL_FILE: &str = "model.bin";
/// Ordered identity records inside a recognizer directory.
pub const IDENTITIES_FILE: &str = "identities.bin";

const IDENTITIES_MAGIC: &[u8; 4] = b"WIDL";
const IDENTITIES_VERSION: u16 = 1;

/// Default distance threshold; matches at or above it are unrecognized.
pub const DEFAULT_MAX_CONFIDENCE: f64 = 100.0;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("recognizer artifact not found: {0}")]
    NotFound(PathBuf),
    #[error("corrupt recognizer artifact {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: ModelError,
    },
    #[error("recognizer artifact has {labels} model labels but {identities} identities")]
    ArityMismatch { labels: usize, identities: usize },
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

struct StoreInner {
    model: Box<dyn FaceModel>,
    identities: Vec<Identity>,
}

/// Thread-safe recognizer shared between the capture cycle and enrollment.
///
/// Recognition never waits on an enrollment: while one is in flight every
/// query answers [`Detection::Unrecognized`].
pub struct RecognizerStore {
    inner: RwLock<StoreInner>,
    enrolling: AtomicBool,
    max_confidence: f64,
}

impl RecognizerStore {
    /// Empty, untrained store backed by the default LBPH model.
    pub fn new(max_confidence: f64) -> Self {
        Self::with_model(Box::new(LbphModel::default()), max_confidence)
    }

    /// Empty store around a caller-supplied model.
    pub fn with_model(model: Box<dyn FaceModel>, max_confidence: f64) -> Self {
        Self::from_parts(model, Vec::new(), max_confidence)
    }

    fn from_parts(model: Box<dyn FaceModel>, identities: Vec<Identity>, max_confidence: f64) -> Self {
        Self {
            inner: RwLock::new(StoreInner { model, identities }),
            enrolling: AtomicBool::new(false),
            max_confidence,
        }
    }

    pub fn max_confidence(&self) -> f64 {
        self.max_confidence
    }

    /// True while an enrollment holds the store.
    pub fn is_enrolling(&self) -> bool {
        self.enrolling.load(Ordering::Acquire)
    }

    pub fn is_trained(&self) -> bool {
        self.read().model.is_trained()
    }

    /// Snapshot of the identity list in label order.
    pub fn identities(&self) -> Vec<Identity> {
        self.read().identities.clone()
    }

    /// Add a new identity trained on `faces`.
    ///
    /// Returns the label assigned, or `None` when `faces` is empty (nothing
    /// is changed in that case).
    pub fn enroll(&self, faces: &[GrayImage], identity: Identity) -> Result<Option<u32>, StoreError> {
        if faces.is_empty() {
            tracing::debug!(name = %identity.name, "enrollment skipped: no face images");
            return Ok(None);
        }

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        self.enrolling.store(true, Ordering::Release);

        let label = inner.identities.len() as u32;
        let result = if inner.model.is_trained() {
            inner.model.update(faces, label)
        } else {
            inner.model.train(faces, label)
        };

        if result.is_ok() {
            inner.identities.push(identity.clone());
        }
        self.enrolling.store(false, Ordering::Release);
        result?;

        tracing::info!(
            label,
            name = %identity.name,
            authorized = identity.authorized,
            samples = faces.len(),
            "identity enrolled"
        );
        Ok(Some(label))
    }

    /// Identify a single (equalized) face crop.
    pub fn recognize(&self, face: &GrayImage) -> Detection {
        if self.is_enrolling() {
            return Detection::Unrecognized;
        }
        let inner = match self.inner.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Detection::Unrecognized,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        if !inner.model.is_trained() {
            return Detection::Unrecognized;
        }

        let Some(prediction) = inner.model.predict(face) else {
            return Detection::Unrecognized;
        };
        let Some(identity) = inner.identities.get(prediction.label as usize) else {
            tracing::warn!(
                label = prediction.label,
                identities = inner.identities.len(),
                "model returned a label with no identity"
            );
            return Detection::Unrecognized;
        };

        tracing::debug!(
            label = prediction.label,
            name = %identity.name,
            distance = prediction.distance,
            "face scored"
        );

        if prediction.distance < self.max_confidence {
            Detection::Recognized {
                identity: identity.clone(),
                confidence: prediction.distance,
            }
        } else {
            tracing::trace!(
                distance = prediction.distance,
                max_confidence = self.max_confidence,
                "nearest match above threshold"
            );
            Detection::Unrecognized
        }
    }

    /// Write the model blob and identity list into directory `dir`.
    ///
    /// Each file is written to a temporary sibling, synced, and renamed over
    /// the previous version.
    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        let (model_bytes, identity_bytes) = {
            let inner = self.read();
            (inner.model.encode(), encode_identities(&inner.identities))
        };

        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        write_atomic(&dir.join(MODEL_FILE), &model_bytes)?;
        write_atomic(&dir.join(IDENTITIES_FILE), &identity_bytes)?;

        tracing::info!(path = %dir.display(), identities = self.read().identities.len(), "recognizer saved");
        Ok(())
    }

    /// Load a directory written by [`save`](Self::save) with the LBPH model.
    pub fn load(dir: &Path, max_confidence: f64) -> Result<Self, StoreError> {
        Self::load_with(dir, max_confidence, |bytes| {
            LbphModel::decode(bytes).map(|m| Box::new(m) as Box<dyn FaceModel>)
        })
    }

    /// Load a directory, decoding the model blob with `decode`.
    pub fn load_with<F>(dir: &Path, max_confidence: f64, decode: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&[u8]) -> Result<Box<dyn FaceModel>, ModelError>,
    {
        let model_path = dir.join(MODEL_FILE);
        let identities_path = dir.join(IDENTITIES_FILE);

        let model_bytes = read_artifact(&model_path)?;
        let identity_bytes = read_artifact(&identities_path)?;

        let model = decode(&model_bytes).map_err(|source| StoreError::Corrupt {
            path: model_path.clone(),
            source,
        })?;
        let identities = decode_identities(&identity_bytes).map_err(|e| StoreError::Corrupt {
            path: identities_path,
            source: e.into(),
        })?;

        let labels = model.labels();
        if labels.len() != identities.len() {
            return Err(StoreError::ArityMismatch {
                labels: labels.len(),
                identities: identities.len(),
            });
        }
        if let Some((expected, &label)) = labels
            .iter()
            .enumerate()
            .find(|&(i, &label)| label as usize != i)
        {
            return Err(StoreError::Corrupt {
                path: model_path,
                source: DecodeError::Malformed(format!(
                    "model label {label} where {expected} was expected"
                ))
                .into(),
            });
        }

        let listing = identities
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{i}: {}", p.name))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(path = %dir.display(), identities = %listing, "recognizer loaded");

        Ok(Self::from_parts(model, identities, max_confidence))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn encode_identities(identities: &[Identity]) -> Vec<u8> {
    let mut w = Writer::new(IDENTITIES_MAGIC, IDENTITIES_VERSION);
    w.u32(identities.len() as u32);
    for identity in identities {
        w.str(&identity.name);
        w.bool(identity.authorized);
    }
    w.finish()
}

fn decode_identities(bytes: &[u8]) -> Result<Vec<Identity>, DecodeError> {
    let (mut r, version) = Reader::open(bytes, IDENTITIES_MAGIC)?;
    if version != IDENTITIES_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let count = r.u32()? as usize;
    let mut identities = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = r.str()?;
        let authorized = r.bool()?;
        identities.push(Identity { name, authorized });
    }
    r.expect_end()?;
    Ok(identities)
}

fn read_artifact(path: &Path) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(path.to_path_buf())
        } else {
            StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp_path = path.with_extension("tmp");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    {
        let mut file = File::create(&tmp_path).map_err(io_err)?;
        file.write_all(data).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::KeyedModel;
    use crate::types::Prediction;
    use std::sync::{Arc, Barrier};

    fn keyed(key: u8) -> GrayImage {
        GrayImage::from_pixel(16, 16, image::Luma([key]))
    }

    fn checker() -> GrayImage {
        GrayImage::from_fn(32, 32, |x, y| image::Luma([if (x + y) % 2 == 0 { 20 } else { 230 }]))
    }

    fn gradient() -> GrayImage {
        GrayImage::from_fn(32, 32, |x, _| image::Luma([(x * 7) as u8]))
    }

    #[test]
    fn test_untrained_store_is_unrecognized() {
        let store = RecognizerStore::new(DEFAULT_MAX_CONFIDENCE);
        assert!(!store.is_trained());
        assert_eq!(store.recognize(&checker()), Detection::Unrecognized);
    }

    #[test]
    fn test_confidence_threshold() {
        let model = KeyedModel::new(&[(1, 0, 85.0), (2, 0, 140.0), (3, 0, 100.0)]);
        let store = RecognizerStore::with_model(Box::new(model), 100.0);
        store
            .enroll(&[keyed(0)], Identity::new("jan", true))
            .unwrap();

        let near = store.recognize(&keyed(1));
        assert_eq!(
            near,
            Detection::Recognized {
                identity: Identity::new("jan", true),
                confidence: 85.0
            }
        );
        assert!(near.is_authorized());

        assert_eq!(store.recognize(&keyed(2)), Detection::Unrecognized);
        assert_eq!(store.recognize(&keyed(2)).confidence(), 0.0);
        // Threshold is strict.
        assert_eq!(store.recognize(&keyed(3)), Detection::Unrecognized);
    }

    #[test]
    fn test_labels_follow_enrollment_order() {
        let model = KeyedModel::new(&[(10, 0, 5.0), (11, 1, 5.0), (12, 2, 5.0)]);
        let store = RecognizerStore::with_model(Box::new(model), 100.0);
        assert_eq!(store.enroll(&[keyed(0)], Identity::new("a", true)).unwrap(), Some(0));
        assert_eq!(store.enroll(&[keyed(0)], Identity::new("b", false)).unwrap(), Some(1));
        assert_eq!(store.enroll(&[keyed(0)], Identity::new("c", true)).unwrap(), Some(2));

        for (key, name) in [(10, "a"), (11, "b"), (12, "c")] {
            let det = store.recognize(&keyed(key));
            assert_eq!(det.identity().map(|i| i.name.as_str()), Some(name));
        }
    }

    #[test]
    fn test_empty_enrollment_is_noop() {
        let store = RecognizerStore::new(DEFAULT_MAX_CONFIDENCE);
        assert_eq!(store.enroll(&[], Identity::new("nobody", true)).unwrap(), None);
        assert!(store.identities().is_empty());
        assert!(!store.is_trained());
    }

    #[test]
    fn test_failed_enrollment_adds_no_identity() {
        let store = RecognizerStore::new(DEFAULT_MAX_CONFIDENCE);
        let err = store.enroll(&[GrayImage::new(3, 3)], Identity::new("tiny", true));
        assert!(matches!(err, Err(StoreError::Model(ModelError::FaceTooSmall { .. }))));
        assert!(store.identities().is_empty());
        assert!(!store.is_enrolling());
    }

    #[test]
    fn test_recognize_during_enrollment_is_unrecognized() {
        struct SlowModel {
            entered: Arc<Barrier>,
            release: Arc<Barrier>,
            inner: KeyedModel,
        }
        impl FaceModel for SlowModel {
            fn is_trained(&self) -> bool {
                self.inner.is_trained()
            }
            fn train(&mut self, faces: &[GrayImage], label: u32) -> Result<(), ModelError> {
                self.inner.train(faces, label)
            }
            fn update(&mut self, faces: &[GrayImage], label: u32) -> Result<(), ModelError> {
                self.entered.wait();
                self.release.wait();
                self.inner.update(faces, label)
            }
            fn predict(&self, face: &GrayImage) -> Option<Prediction> {
                self.inner.predict(face)
            }
            fn labels(&self) -> Vec<u32> {
                self.inner.labels()
            }
            fn encode(&self) -> Vec<u8> {
                Vec::new()
            }
        }

        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let model = SlowModel {
            entered: entered.clone(),
            release: release.clone(),
            inner: KeyedModel::new(&[(1, 0, 10.0)]),
        };
        let store = Arc::new(RecognizerStore::with_model(Box::new(model), 100.0));
        store.enroll(&[keyed(0)], Identity::new("first", true)).unwrap();
        assert!(store.recognize(&keyed(1)).is_authorized());

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.enroll(&[keyed(0)], Identity::new("second", true)))
        };

        entered.wait();
        assert!(store.is_enrolling());
        assert_eq!(store.recognize(&keyed(1)), Detection::Unrecognized);
        release.wait();

        assert_eq!(writer.join().unwrap().unwrap(), Some(1));
        assert!(!store.is_enrolling());
        assert!(store.recognize(&keyed(1)).is_authorized());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/recognizer");

        let store = RecognizerStore::new(DEFAULT_MAX_CONFIDENCE);
        store.enroll(&[checker()], Identity::new("jan", true)).unwrap();
        store.enroll(&[gradient()], Identity::new("guest", false)).unwrap();
        store.save(&path).unwrap();

        let loaded = RecognizerStore::load(&path, DEFAULT_MAX_CONFIDENCE).unwrap();
        assert_eq!(loaded.identities(), store.identities());
        for face in [checker(), gradient()] {
            assert_eq!(loaded.recognize(&face), store.recognize(&face));
        }
        assert_eq!(
            loaded.recognize(&checker()).identity().map(|i| i.name.clone()),
            Some("jan".to_string())
        );
        assert!(!path.join("model.tmp").exists());
    }

    #[test]
    fn test_save_untrained_then_load() {
        let dir = tempfile::tempdir().unwrap();
        RecognizerStore::new(DEFAULT_MAX_CONFIDENCE).save(dir.path()).unwrap();
        let loaded = RecognizerStore::load(dir.path(), DEFAULT_MAX_CONFIDENCE).unwrap();
        assert!(!loaded.is_trained());
        assert!(loaded.identities().is_empty());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = RecognizerStore::load(&dir.path().join("absent"), DEFAULT_MAX_CONFIDENCE)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_load_arity_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecognizerStore::new(DEFAULT_MAX_CONFIDENCE);
        store.enroll(&[checker()], Identity::new("jan", true)).unwrap();
        store.save(dir.path()).unwrap();

        let extra = encode_identities(&[Identity::new("jan", true), Identity::new("ghost", false)]);
        fs::write(dir.path().join(IDENTITIES_FILE), extra).unwrap();

        let err = RecognizerStore::load(dir.path(), DEFAULT_MAX_CONFIDENCE).err().unwrap();
        assert!(matches!(
            err,
            StoreError::ArityMismatch {
                labels: 1,
                identities: 2
            }
        ));
    }

    #[test]
    fn test_load_rejects_label_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = LbphModel::default();
        model.train(&[checker()], 0).unwrap();
        model.update(&[gradient()], 7).unwrap();
        fs::write(dir.path().join(MODEL_FILE), model.encode()).unwrap();
        let identities = encode_identities(&[Identity::new("jan", true), Identity::new("eva", true)]);
        fs::write(dir.path().join(IDENTITIES_FILE), identities).unwrap();

        let err = RecognizerStore::load(dir.path(), DEFAULT_MAX_CONFIDENCE).err().unwrap();
        match err {
            StoreError::Corrupt { path, source } => {
                assert_eq!(path, dir.path().join(MODEL_FILE));
                assert!(matches!(source, ModelError::Corrupt(DecodeError::Malformed(_))));
            }
            other => panic!("expected corrupt artifact, got {other}"),
        }
    }

    #[test]
    fn test_load_oversized_model_params_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        RecognizerStore::new(DEFAULT_MAX_CONFIDENCE).save(dir.path()).unwrap();

        let mut w = Writer::new(b"LBPH", 1);
        for v in [1, 8, 70_000, 70_000, 0] {
            w.u32(v);
        }
        fs::write(dir.path().join(MODEL_FILE), w.finish()).unwrap();
        let err = RecognizerStore::load(dir.path(), DEFAULT_MAX_CONFIDENCE).err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));

        let mut w = Writer::new(b"LBPH", 1);
        for v in [0x8000_0000, 8, 8, 8, 0] {
            w.u32(v);
        }
        fs::write(dir.path().join(MODEL_FILE), w.finish()).unwrap();
        let err = RecognizerStore::load(dir.path(), DEFAULT_MAX_CONFIDENCE).err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_load_corrupt_identities() {
        let dir = tempfile::tempdir().unwrap();
        RecognizerStore::new(DEFAULT_MAX_CONFIDENCE).save(dir.path()).unwrap();
        fs::write(dir.path().join(IDENTITIES_FILE), b"WIDL\x01\x00\x05\x00\x00\x00").unwrap();

        let err = RecognizerStore::load(dir.path(), DEFAULT_MAX_CONFIDENCE).err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_identity_records_keep_order() {
        let list = vec![
            Identity::new("Ada", true),
            Identity::new("Bořek", false),
            Identity::new("", true),
        ];
        assert_eq!(decode_identities(&encode_identities(&list)).unwrap(), list);
    }
}
