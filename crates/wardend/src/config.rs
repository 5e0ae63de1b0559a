use std::path::PathBuf;
use std::time::Duration;
use warden_core::authorization::{DEFAULT_DISABLE_DELAY, DEFAULT_FRAME_CHANGE_COUNT};
use warden_core::controller::DEFAULT_CAPTURE_RATE_HZ;
use warden_core::recognizer::DEFAULT_MAX_CONFIDENCE;
use warden_core::{AuthorizationConfig, ControllerConfig, FaceRegion};

/// Which message bus to serve on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Fixed face window for the presence detector; centered when unset.
    pub face_region: Option<FaceRegion>,
    pub capture_rate_hz: u32,
    /// Consecutive ticks needed before the output flips.
    pub frame_change_count: u32,
    /// Time between losing the authorized face and the OFF command.
    pub disable_delay: Duration,
    /// Distance threshold; matches at or above it are unrecognized.
    pub max_confidence: f64,
    /// Recognizer artifact loaded at startup, if any.
    pub recognizer_dir: Option<PathBuf>,
    /// TOML list of output devices. No outputs are driven when unset.
    pub devices_file: Option<PathBuf>,
    /// Root under which `gpio/` and `pwm/` live.
    pub sysfs_root: PathBuf,
    /// Decay the output while no recognizer is attached.
    pub deny_without_recognizer: bool,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `WARDEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            camera_device: std::env::var("WARDEN_CAMERA_DEVICE")
                .unwrap_or_else(|_| warden_hw::camera::DEFAULT_DEVICE.to_string()),
            camera_width: env_u32("WARDEN_CAMERA_WIDTH", warden_hw::camera::DEFAULT_WIDTH),
            camera_height: env_u32("WARDEN_CAMERA_HEIGHT", warden_hw::camera::DEFAULT_HEIGHT),
            face_region: std::env::var("WARDEN_FACE_REGION")
                .ok()
                .and_then(|v| parse_region(&v)),
            capture_rate_hz: env_u32("WARDEN_CAPTURE_RATE_HZ", DEFAULT_CAPTURE_RATE_HZ),
            frame_change_count: env_u32("WARDEN_FRAME_CHANGE_COUNT", DEFAULT_FRAME_CHANGE_COUNT),
            disable_delay: Duration::from_secs(env_u64(
                "WARDEN_DISABLE_DELAY_SECS",
                DEFAULT_DISABLE_DELAY.as_secs(),
            )),
            max_confidence: env_f64("WARDEN_MAX_CONFIDENCE", DEFAULT_MAX_CONFIDENCE),
            recognizer_dir: std::env::var("WARDEN_RECOGNIZER_DIR").ok().map(PathBuf::from),
            devices_file: std::env::var("WARDEN_DEVICES_FILE").ok().map(PathBuf::from),
            sysfs_root: std::env::var("WARDEN_SYSFS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(warden_hw::output::DEFAULT_SYSFS_ROOT)),
            deny_without_recognizer: std::env::var("WARDEN_DENY_WITHOUT_RECOGNIZER")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            bus: match std::env::var("WARDEN_BUS").as_deref() {
                Ok("session") => BusKind::Session,
                _ => BusKind::System,
            },
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            authorization: AuthorizationConfig {
                frame_change_count: self.frame_change_count,
                disable_delay: self.disable_delay,
            },
            max_confidence: self.max_confidence,
            capture_rate_hz: self.capture_rate_hz,
            deny_without_recognizer: self.deny_without_recognizer,
        }
    }
}

/// Parse `x,y,width,height`.
fn parse_region(value: &str) -> Option<FaceRegion> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts[..] {
        [x, y, width, height] if width > 0 && height > 0 => {
            Some(FaceRegion::new(x, y, width, height))
        }
        _ => {
            tracing::warn!(value, "ignoring malformed WARDEN_FACE_REGION");
            None
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_config_carries_daemon_settings() {
        let config = Config {
            camera_device: "/dev/video2".into(),
            camera_width: 320,
            camera_height: 240,
            face_region: None,
            capture_rate_hz: 12,
            frame_change_count: 3,
            disable_delay: Duration::from_secs(9),
            max_confidence: 72.5,
            recognizer_dir: None,
            devices_file: None,
            sysfs_root: PathBuf::from("/tmp/sys"),
            deny_without_recognizer: true,
            bus: BusKind::Session,
        };
        let controller = config.controller_config();
        assert_eq!(controller.capture_rate_hz, 12);
        assert_eq!(controller.max_confidence, 72.5);
        assert!(controller.deny_without_recognizer);
        assert_eq!(controller.authorization.frame_change_count, 3);
        assert_eq!(controller.authorization.disable_delay, Duration::from_secs(9));
    }

    #[test]
    fn test_parse_region() {
        assert_eq!(parse_region("10, 20,100,120"), Some(FaceRegion::new(10, 20, 100, 120)));
        assert_eq!(parse_region("10,20,0,120"), None);
        assert_eq!(parse_region("10,20,100"), None);
        assert_eq!(parse_region("a,b,c,d"), None);
    }
}
