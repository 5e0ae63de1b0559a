use crate::engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use warden_core::{Identity, RecognizerStore, StoreError};
use zbus::interface;

/// D-Bus interface for the Warden access controller.
///
/// Bus name: org.warden.Controller1
/// Object path: /org/warden/Controller1
pub struct WardenService {
    engine: Arc<Engine>,
}

impl WardenService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Threshold for stores created or loaded over the bus.
    fn max_confidence(&self) -> f64 {
        self.engine.controller().config().max_confidence
    }

    fn attached_recognizer(&self) -> zbus::fdo::Result<Arc<RecognizerStore>> {
        self.engine
            .controller()
            .recognizer()
            .ok_or_else(|| zbus::fdo::Error::Failed("no recognizer loaded".into()))
    }
}

fn store_error(e: StoreError) -> zbus::fdo::Error {
    match e {
        StoreError::NotFound(path) => zbus::fdo::Error::FileNotFound(path.display().to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn join_error(e: tokio::task::JoinError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("internal task failed: {e}"))
}

#[interface(name = "org.warden.Controller1")]
impl WardenService {
    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.controller().status().await;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.engine.camera_device(),
            "capturing": self.engine.is_capturing().await,
            "controller": status,
            "outputs": self.engine.gateway().states(),
            "blinking": self.engine.gateway().is_blinking(),
        })
        .to_string())
    }

    /// Attach a new, untrained recognizer, replacing the current one.
    async fn create_recognizer(&self) -> zbus::fdo::Result<()> {
        tracing::info!("create_recognizer requested");
        let store = RecognizerStore::new(self.max_confidence());
        self.engine.controller().attach_recognizer(Arc::new(store));
        Ok(())
    }

    /// Load a recognizer artifact directory and attach it.
    async fn load_recognizer(&self, path: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(path, "load_recognizer requested");
        let dir = PathBuf::from(path);
        let max_confidence = self.max_confidence();
        let store = tokio::task::spawn_blocking(move || RecognizerStore::load(&dir, max_confidence))
            .await
            .map_err(join_error)?
            .map_err(store_error)?;
        let identities = store.identities().len() as u32;
        self.engine.controller().attach_recognizer(Arc::new(store));
        Ok(identities)
    }

    /// Save the attached recognizer into an artifact directory.
    async fn save_recognizer(&self, path: &str) -> zbus::fdo::Result<()> {
        tracing::info!(path, "save_recognizer requested");
        let store = self.attached_recognizer()?;
        let dir = PathBuf::from(path);
        tokio::task::spawn_blocking(move || store.save(&dir))
            .await
            .map_err(join_error)?
            .map_err(store_error)
    }

    /// Start collecting face crops for a new identity.
    async fn track_face(&self) -> zbus::fdo::Result<()> {
        tracing::info!("track_face requested");
        self.attached_recognizer()?;
        self.engine.controller().begin_enrollment().await;
        Ok(())
    }

    /// Finish collecting and enroll the crops as `name`. Returns JSON with
    /// the assigned label (null when no crops were collected).
    async fn save_face(&self, name: &str, authorized: bool) -> zbus::fdo::Result<String> {
        tracing::info!(name, authorized, "save_face requested");
        let store = self.attached_recognizer()?;
        let faces = self.engine.controller().finish_enrollment().await;
        let frames = faces.len();
        let identity = Identity::new(name, authorized);
        let label = tokio::task::spawn_blocking(move || store.enroll(&faces, identity))
            .await
            .map_err(join_error)?
            .map_err(store_error)?;
        Ok(serde_json::json!({ "label": label, "frames": frames }).to_string())
    }

    /// Faces seen on the latest tick as JSON.
    async fn faces(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.latest_faces();
        serde_json::to_string(&report).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// List identities of the attached recognizer as JSON.
    async fn identities(&self) -> zbus::fdo::Result<String> {
        let store = self.attached_recognizer()?;
        serde_json::to_string(&store.identities()).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Re-open the camera and restart capture with fresh hysteresis state.
    async fn restart_camera(&self) -> zbus::fdo::Result<()> {
        tracing::info!("restart_camera requested");
        self.engine
            .restart_camera()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}
