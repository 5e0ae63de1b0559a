use crate::config::Config;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use warden_core::detector::PresenceDetector;
use warden_core::pipeline::CaptureError;
use warden_core::scheduler::SchedulerError;
use warden_core::{
    Actuator, CaptureScheduler, Controller, DetectionObserver, FrameSource, RecognizerStore,
    StoreError, TickReport,
};
use warden_hw::{Camera, CameraError, DeviceError, OutputGateway};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("output device error: {0}")]
    Devices(#[from] DeviceError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] StoreError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Camera adapter: dark frames count as "no frame this tick".
struct CameraFeed(Camera);

impl FrameSource for CameraFeed {
    fn grab(&mut self) -> Result<Option<image::GrayImage>, CaptureError> {
        let frame = self.0.capture_frame().map_err(|e| match e {
            CameraError::DeviceNotFound(d) => CaptureError::Disconnected(d),
            other => CaptureError::Failed(other.to_string()),
        })?;
        if frame.is_dark {
            tracing::trace!(
                seq = frame.sequence,
                brightness = frame.avg_brightness(),
                "dark frame skipped"
            );
            return Ok(None);
        }
        Ok(frame.into_image())
    }
}

/// Output adapter forwarding controller commands to the gateway.
struct GatewayOutput(Arc<OutputGateway>);

impl Actuator for GatewayOutput {
    fn set_state(&self, on: bool) {
        self.0.set_state(on);
    }

    fn set_blink(&self, enabled: bool) {
        self.0.set_blink(enabled);
    }
}

/// Keeps the latest tick for the `Faces` query.
struct FaceFeed(watch::Sender<Option<TickReport>>);

impl DetectionObserver for FaceFeed {
    fn observe(&self, report: &TickReport) {
        self.0.send_replace(Some(report.clone()));
    }
}

/// Camera settings kept for re-opening the device.
#[derive(Clone)]
struct CameraSettings {
    device: String,
    width: u32,
    height: u32,
    face_region: Option<warden_core::FaceRegion>,
}

/// Everything the daemon runs: outputs, controller, capture thread.
pub struct Engine {
    controller: Controller,
    gateway: Arc<OutputGateway>,
    scheduler: Mutex<Option<CaptureScheduler>>,
    camera: CameraSettings,
    faces: watch::Receiver<Option<TickReport>>,
}

impl Engine {
    /// Open outputs, load the recognizer, open the camera and start
    /// capturing. Fails fast if a configured resource is unusable.
    pub fn start(config: &Config, runtime: Handle) -> Result<Self, EngineError> {
        let gateway = match &config.devices_file {
            Some(path) => {
                let specs = warden_hw::devices::load_devices(path)?;
                OutputGateway::open(&config.sysfs_root, &specs)?
            }
            None => {
                tracing::warn!("WARDEN_DEVICES_FILE not set; running without outputs");
                OutputGateway::new(Vec::new())
            }
        };
        let gateway = Arc::new(gateway);

        let controller = Controller::new(
            config.controller_config(),
            Arc::new(GatewayOutput(gateway.clone())),
            runtime,
        );
        let (faces_tx, faces) = watch::channel(None);
        controller.set_observer(Some(Arc::new(FaceFeed(faces_tx))));

        if let Some(dir) = &config.recognizer_dir {
            match RecognizerStore::load(dir, controller.config().max_confidence) {
                Ok(store) => controller.attach_recognizer(Arc::new(store)),
                Err(StoreError::NotFound(path)) => tracing::warn!(
                    path = %path.display(),
                    "recognizer artifact not found; starting without recognizer"
                ),
                Err(e) => return Err(e.into()),
            }
        }

        let camera = CameraSettings {
            device: config.camera_device.clone(),
            width: config.camera_width,
            height: config.camera_height,
            face_region: config.face_region,
        };
        let scheduler = spawn_capture(&controller, &camera)?;

        Ok(Self {
            controller,
            gateway,
            scheduler: Mutex::new(Some(scheduler)),
            camera,
            faces,
        })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn gateway(&self) -> &OutputGateway {
        &self.gateway
    }

    pub fn camera_device(&self) -> &str {
        &self.camera.device
    }

    pub fn latest_faces(&self) -> Option<TickReport> {
        self.faces.borrow().clone()
    }

    pub async fn is_capturing(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }

    /// Stop capture, forget the hysteresis state, re-open the camera and
    /// resume.
    pub async fn restart_camera(&self) -> Result<(), EngineError> {
        let mut slot = self.scheduler.lock().await;
        if let Some(running) = slot.take() {
            // The old camera must be closed before it can be re-opened.
            tokio::task::spawn_blocking(move || drop(running.stop())).await?;
        }
        self.controller.reset().await;

        let controller = self.controller.clone();
        let camera = self.camera.clone();
        let scheduler = tokio::task::spawn_blocking(move || spawn_capture(&controller, &camera)).await??;
        *slot = Some(scheduler);
        tracing::info!(device = %self.camera.device, "camera restarted");
        Ok(())
    }

    /// Ordered teardown: stop capturing, cancel the pending disable, release
    /// the camera, then drive every output OFF.
    pub async fn shutdown(&self) {
        let camera = match self.scheduler.lock().await.take() {
            Some(running) => tokio::task::spawn_blocking(move || running.stop())
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "capture thread did not stop cleanly");
                    None
                }),
            None => None,
        };
        self.controller.cancel_pending_disable().await;
        if camera.is_some() {
            drop(camera);
            tracing::info!(device = %self.camera.device, "camera released");
        }
        self.controller.shutdown().await;
        self.gateway.shutdown();
    }
}

fn spawn_capture(
    controller: &Controller,
    camera: &CameraSettings,
) -> Result<CaptureScheduler, EngineError> {
    let device = Camera::open(&camera.device, camera.width, camera.height)?;
    tracing::info!(
        device = %camera.device,
        width = device.width,
        height = device.height,
        fourcc = ?device.fourcc,
        "camera opened"
    );
    let detector = PresenceDetector::new(camera.face_region);
    Ok(CaptureScheduler::start(
        controller.clone(),
        Box::new(CameraFeed(device)),
        Box::new(detector),
        controller.config().capture_rate_hz,
    )?)
}
