//! Timing: the cancellable one-shot used for the delayed disable, and the
//! fixed-rate capture thread that drives [`Controller::tick`].

use crate::controller::Controller;
use crate::pipeline::{FaceDetector, FrameSource};
use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle as TaskHandle;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("capture rate must be at least 1 Hz")]
    InvalidRate,
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Restartable one-shot timer on a tokio runtime.
///
/// Every `arm` bumps a generation number and hands it to the callback. The
/// owner keeps this value behind the same lock the callback takes, and the
/// callback calls [`DelayedTask::claim`] first, so a firing that lost the
/// race against `cancel` or a re-arm does nothing.
pub struct DelayedTask {
    runtime: Handle,
    pending: Option<TaskHandle<()>>,
    generation: u64,
}

impl DelayedTask {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: None,
            generation: 0,
        }
    }

    /// Start the countdown, replacing any pending one. Returns the new
    /// generation.
    pub fn arm<F, Fut>(&mut self, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.abort_pending() {
            tracing::trace!(generation = self.generation, "delayed task restarted");
        }
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation).await;
        }));
        generation
    }

    /// Abort the pending countdown. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        if self.abort_pending() {
            self.generation = self.generation.wrapping_add(1);
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Called by a firing callback: true (and disarmed) if `generation` is
    /// still the live one.
    pub fn claim(&mut self, generation: u64) -> bool {
        if self.pending.is_some() && self.generation == generation {
            self.pending = None;
            true
        } else {
            false
        }
    }

    fn abort_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.abort_pending();
    }
}

/// Owns the capture thread. Ticks run back to back at the configured
/// rate; a slow tick delays the next one and missed ticks are not replayed.
pub struct CaptureScheduler {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<Box<dyn FrameSource>>>,
}

impl CaptureScheduler {
    /// Spawn the capture thread. The source is owned by the thread until
    /// [`stop`](Self::stop) hands it back; dropping the scheduler instead
    /// releases it.
    pub fn start(
        controller: Controller,
        mut source: Box<dyn FrameSource>,
        mut detector: Box<dyn FaceDetector>,
        rate_hz: u32,
    ) -> Result<Self, SchedulerError> {
        if rate_hz == 0 {
            return Err(SchedulerError::InvalidRate);
        }
        let period = Duration::from_secs(1) / rate_hz;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("warden-capture".into())
            .spawn(move || {
                tracing::info!(
                    rate_hz,
                    detector = detector.name(),
                    "capture thread started"
                );
                loop {
                    let started = Instant::now();
                    controller.tick(source.as_mut(), detector.as_mut());
                    let wait = period.saturating_sub(started.elapsed());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("capture thread exiting");
                source
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop ticking, wait for the in-flight tick to finish and return the
    /// still-open source. `None` if the capture thread panicked.
    pub fn stop(mut self) -> Option<Box<dyn FrameSource>> {
        self.halt()
    }

    fn halt(&mut self) -> Option<Box<dyn FrameSource>> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(source) => Some(source),
            Err(_) => {
                tracing::error!("capture thread panicked");
                None
            }
        }
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        if self.halt().is_some() {
            tracing::debug!("capture source released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use crate::testing::{uniform_frame, FixedDetector, RecordingActuator, ScriptedSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_delayed_task_fires_once() {
        let rt = runtime();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut task = DelayedTask::new(rt.handle().clone());

        let counter = fired.clone();
        let generation = task.arm(Duration::from_millis(20), move |g| async move {
            assert_eq!(g, 1);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(generation, 1);
        assert!(task.is_armed());

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(task.claim(generation));
        assert!(!task.is_armed());
    }

    #[test]
    fn test_delayed_task_cancel() {
        let rt = runtime();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut task = DelayedTask::new(rt.handle().clone());

        let counter = fired.clone();
        let generation = task.arm(Duration::from_millis(50), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.cancel());
        assert!(!task.cancel());
        assert!(!task.claim(generation));

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delayed_task_rearm_restarts_countdown() {
        let rt = runtime();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut task = DelayedTask::new(rt.handle().clone());

        let counter = fired.clone();
        let first = task.arm(Duration::from_millis(100), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        let counter = fired.clone();
        let second = task.arm(Duration::from_millis(100), move |_| async move {
            counter.fetch_add(10, Ordering::SeqCst);
        });
        assert_ne!(first, second);
        assert!(!task.claim(first));

        // The first deadline passes without a firing.
        std::thread::sleep(Duration::from_millis(70));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_capture_scheduler_ticks_and_hands_back_source() {
        let rt = runtime();
        let controller = Controller::new(
            ControllerConfig::default(),
            Arc::new(RecordingActuator::default()),
            rt.handle().clone(),
        );
        let source = ScriptedSource::new((0..3).map(|_| Some(uniform_frame(10))));
        let grabs = source.grabs.clone();
        let released = source.released.clone();

        let scheduler = CaptureScheduler::start(
            controller,
            Box::new(source),
            Box::new(FixedDetector { regions: Vec::new() }),
            50,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(200));
        let source = scheduler.stop().unwrap();

        assert!(grabs.load(Ordering::SeqCst) >= 3);
        assert!(!released.load(Ordering::SeqCst));

        let after = grabs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(grabs.load(Ordering::SeqCst), after);

        drop(source);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_dropping_capture_scheduler_releases_source() {
        let rt = runtime();
        let controller = Controller::new(
            ControllerConfig::default(),
            Arc::new(RecordingActuator::default()),
            rt.handle().clone(),
        );
        let source = ScriptedSource::new([]);
        let released = source.released.clone();

        let scheduler = CaptureScheduler::start(
            controller,
            Box::new(source),
            Box::new(FixedDetector { regions: Vec::new() }),
            50,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        drop(scheduler);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_capture_scheduler_rejects_zero_rate() {
        let rt = runtime();
        let controller = Controller::new(
            ControllerConfig::default(),
            Arc::new(RecordingActuator::default()),
            rt.handle().clone(),
        );
        let result = CaptureScheduler::start(
            controller,
            Box::new(ScriptedSource::new([])),
            Box::new(FixedDetector { regions: Vec::new() }),
            0,
        );
        assert!(matches!(result, Err(SchedulerError::InvalidRate)));
    }
}
