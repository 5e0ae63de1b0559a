//! Access controller: one capture tick at a time, feeding recognitions into
//! the authorization state machine and translating its actions into
//! actuator commands and the delayed-disable timer.
//!
//! All mutable session state (hysteresis, enrollment buffer, timer) sits
//! behind a single async mutex. The capture thread takes it with
//! `blocking_lock`; the timer callback and control requests take it with
//! `lock().await`. A tick and a timer firing therefore never interleave.

use crate::authorization::{Action, AuthorizationConfig, AuthorizationState};
use crate::enrollment::EnrollmentSession;
use crate::imaging;
use crate::pipeline::{Actuator, DetectionObserver, FaceDetector, FrameSource, TickReport};
use crate::recognizer::{RecognizerStore, DEFAULT_MAX_CONFIDENCE};
use crate::scheduler::DelayedTask;
use crate::types::Detection;
use image::GrayImage;
use serde::Serialize;
use std::sync::{Arc, RwLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::Mutex;

pub const DEFAULT_CAPTURE_RATE_HZ: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub authorization: AuthorizationConfig,
    /// Distance threshold for stores created or loaded by the controller's
    /// owner.
    pub max_confidence: f64,
    pub capture_rate_hz: u32,
    /// With no recognizer attached, count every tick as "no authorized
    /// face" instead of skipping it.
    pub deny_without_recognizer: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            authorization: AuthorizationConfig::default(),
            max_confidence: DEFAULT_MAX_CONFIDENCE,
            capture_rate_hz: DEFAULT_CAPTURE_RATE_HZ,
            deny_without_recognizer: false,
        }
    }
}

/// Point-in-time view for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub output_enabled: bool,
    pub tolerance_counter: u32,
    pub disable_pending: bool,
    pub enrollment_active: bool,
    pub enrollment_frames: usize,
    pub recognizer_attached: bool,
    pub recognizer_trained: bool,
    pub identities: usize,
}

struct Session {
    auth: AuthorizationState,
    enrollment: EnrollmentSession,
    disable_timer: DelayedTask,
}

struct Shared {
    config: ControllerConfig,
    session: Mutex<Session>,
    recognizer: RwLock<Option<Arc<RecognizerStore>>>,
    observer: RwLock<Option<Arc<dyn DetectionObserver>>>,
    actuator: Arc<dyn Actuator>,
}

/// Clone-safe handle to the controller.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    /// `runtime` hosts the delayed-disable timer.
    pub fn new(config: ControllerConfig, actuator: Arc<dyn Actuator>, runtime: Handle) -> Self {
        let session = Session {
            auth: AuthorizationState::new(config.authorization),
            enrollment: EnrollmentSession::new(),
            disable_timer: DelayedTask::new(runtime),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                session: Mutex::new(session),
                recognizer: RwLock::new(None),
                observer: RwLock::new(None),
                actuator,
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    /// Current recognizer, if any.
    pub fn recognizer(&self) -> Option<Arc<RecognizerStore>> {
        self.shared
            .recognizer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in a recognizer. Takes effect from the next tick.
    pub fn attach_recognizer(&self, store: Arc<RecognizerStore>) {
        tracing::info!(
            identities = store.identities().len(),
            trained = store.is_trained(),
            "recognizer attached"
        );
        *self.shared.recognizer.write().unwrap_or_else(|e| e.into_inner()) = Some(store);
    }

    pub fn detach_recognizer(&self) -> Option<Arc<RecognizerStore>> {
        self.shared
            .recognizer
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn DetectionObserver>>) {
        *self.shared.observer.write().unwrap_or_else(|e| e.into_inner()) = observer;
    }

    fn observer(&self) -> Option<Arc<dyn DetectionObserver>> {
        self.shared
            .observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run one capture tick. Must be called from outside the async runtime
    /// (it blocks on the session lock).
    ///
    /// A tick with no frame, no recognizer, or a failed detection leaves
    /// all state untouched.
    pub fn tick(&self, source: &mut dyn FrameSource, detector: &mut dyn FaceDetector) {
        let frame = match source.grab() {
            Ok(Some(frame)) if frame.width() > 0 && frame.height() > 0 => frame,
            Ok(_) => {
                tracing::trace!("no frame this tick");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame capture failed; skipping tick");
                return;
            }
        };

        let Some(store) = self.recognizer() else {
            if self.shared.config.deny_without_recognizer {
                let mut session = self.shared.session.blocking_lock();
                let actions = session.auth.on_tick(false);
                self.shared.apply(&mut session, actions);
            }
            return;
        };

        let regions = match detector.detect(&frame) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, detector = detector.name(), "detection failed; skipping tick");
                return;
            }
        };

        let detections: Vec<Detection> = regions
            .iter()
            .map(|region| match imaging::crop(&frame, region) {
                Some(face) => store.recognize(&imaging::equalized(&face)),
                None => Detection::Unrecognized,
            })
            .collect();
        let authorized_detected = detections.iter().any(Detection::is_authorized);

        if let Some(observer) = self.observer() {
            observer.observe(&TickReport {
                frame_width: frame.width(),
                frame_height: frame.height(),
                regions: regions.clone(),
                detections,
            });
        }

        let mut session = self.shared.session.blocking_lock();
        let actions = session.auth.on_tick(authorized_detected);
        self.shared.apply(&mut session, actions);
        if session.enrollment.offer(&frame, &regions) {
            tracing::debug!(frames = session.enrollment.len(), "enrollment frame captured");
        }
    }

    /// Start buffering single-face crops, discarding any unfinished buffer.
    pub async fn begin_enrollment(&self) {
        self.shared.session.lock().await.enrollment.begin();
        tracing::info!("enrollment session started");
    }

    /// End the session and hand over the buffered crops.
    pub async fn finish_enrollment(&self) -> Vec<GrayImage> {
        let faces = self.shared.session.lock().await.enrollment.finish();
        tracing::info!(frames = faces.len(), "enrollment session finished");
        faces
    }

    pub async fn status(&self) -> ControllerStatus {
        let store = self.recognizer();
        let session = self.shared.session.lock().await;
        ControllerStatus {
            output_enabled: session.auth.output_enabled(),
            tolerance_counter: session.auth.tolerance_counter(),
            disable_pending: session.auth.disable_timer_armed(),
            enrollment_active: session.enrollment.is_active(),
            enrollment_frames: session.enrollment.len(),
            recognizer_attached: store.is_some(),
            recognizer_trained: store.as_ref().is_some_and(|s| s.is_trained()),
            identities: store.as_ref().map_or(0, |s| s.identities().len()),
        }
    }

    /// Forget the hysteresis state after the camera was re-opened. Any
    /// pending disable is cancelled and the output forced OFF.
    pub async fn reset(&self) {
        let mut session = self.shared.session.lock().await;
        session.disable_timer.cancel();
        session.auth.reset();
        self.shared.actuator.set_blink(false);
        self.shared.actuator.set_state(false);
        tracing::info!("authorization state reset");
    }

    /// Stop a pending delayed disable from firing, without touching the
    /// outputs. The caller then owns the OFF, as in an ordered teardown.
    /// Returns whether one was pending.
    pub async fn cancel_pending_disable(&self) -> bool {
        let cancelled = self.shared.session.lock().await.disable_timer.cancel();
        if cancelled {
            tracing::debug!("pending disable cancelled");
        }
        cancelled
    }

    /// Cancel the pending disable and leave every output OFF and steady.
    pub async fn shutdown(&self) {
        let mut session = self.shared.session.lock().await;
        if session.disable_timer.cancel() {
            tracing::debug!("pending disable cancelled for shutdown");
        }
        session.enrollment.finish();
        self.shared.actuator.set_blink(false);
        self.shared.actuator.set_state(false);
        tracing::info!("controller shut down; outputs off");
    }
}

impl Shared {
    fn apply(self: &Arc<Self>, session: &mut Session, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Enable => self.actuator.set_state(true),
                Action::Disable => self.actuator.set_state(false),
                Action::StartBlink => self.actuator.set_blink(true),
                Action::StopBlink => self.actuator.set_blink(false),
                Action::ArmDisableTimer(delay) => {
                    let shared = Arc::downgrade(self);
                    session
                        .disable_timer
                        .arm(delay, move |generation| Shared::disable_elapsed(shared, generation));
                }
                Action::CancelDisableTimer => {
                    session.disable_timer.cancel();
                }
            }
        }
    }

    async fn disable_elapsed(shared: Weak<Shared>, generation: u64) {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut session = shared.session.lock().await;
        if !session.disable_timer.claim(generation) {
            tracing::trace!(generation, "stale disable timer ignored");
            return;
        }
        let actions = session.auth.on_disable_timer();
        shared.apply(&mut session, actions);
    }
}
