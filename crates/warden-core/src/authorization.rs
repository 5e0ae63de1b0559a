//! Authorization hysteresis.
//!
//! The output is enabled only after an authorized face has been seen on
//! `frame_change_count + 1` consecutive ticks, and disabled only after the
//! same number of consecutive misses. A committed disable does not switch the
//! output off directly: it starts the warning blink and arms a delayed OFF.
//! Any authorized detection inside that delay window re-asserts ON at once.
//!
//! This module is pure; it returns [`Action`]s and leaves timers and
//! hardware to the caller.

use std::time::Duration;

pub const DEFAULT_FRAME_CHANGE_COUNT: u32 = 5;
pub const DEFAULT_DISABLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationConfig {
    /// Consecutive ticks tolerated before a flip commits.
    pub frame_change_count: u32,
    /// Time between a committed disable and the OFF command.
    pub disable_delay: Duration,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            frame_change_count: DEFAULT_FRAME_CHANGE_COUNT,
            disable_delay: DEFAULT_DISABLE_DELAY,
        }
    }
}

/// Side effect requested by a transition, in the order it must be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Actuate the output ON.
    Enable,
    /// Actuate the output OFF.
    Disable,
    StartBlink,
    StopBlink,
    /// Start the delayed-disable countdown, restarting it if already running.
    ArmDisableTimer(Duration),
    CancelDisableTimer,
}

/// Per-camera-session authorization state.
#[derive(Debug, Clone)]
pub struct AuthorizationState {
    config: AuthorizationConfig,
    output_enabled: bool,
    tolerance_counter: u32,
    disable_timer_armed: bool,
}

impl AuthorizationState {
    pub fn new(config: AuthorizationConfig) -> Self {
        Self {
            config,
            output_enabled: false,
            tolerance_counter: 0,
            disable_timer_armed: false,
        }
    }

    pub fn config(&self) -> AuthorizationConfig {
        self.config
    }

    pub fn output_enabled(&self) -> bool {
        self.output_enabled
    }

    pub fn tolerance_counter(&self) -> u32 {
        self.tolerance_counter
    }

    pub fn disable_timer_armed(&self) -> bool {
        self.disable_timer_armed
    }

    /// Advance one capture tick.
    pub fn on_tick(&mut self, authorized_detected: bool) -> Vec<Action> {
        let limit = self.config.frame_change_count;
        let mut actions = Vec::new();

        if authorized_detected {
            if !self.output_enabled && !self.disable_timer_armed && self.tolerance_counter < limit {
                self.tolerance_counter += 1;
                tracing::trace!(counter = self.tolerance_counter, "authorized streak");
            } else {
                if self.disable_timer_armed {
                    actions.push(Action::CancelDisableTimer);
                    actions.push(Action::StopBlink);
                    self.disable_timer_armed = false;
                    tracing::info!("authorized face reacquired; pending disable cancelled");
                }
                if !self.output_enabled {
                    tracing::info!("output enabled");
                }
                self.output_enabled = true;
                actions.push(Action::Enable);
                self.tolerance_counter = 0;
            }
        } else if self.output_enabled {
            if self.tolerance_counter < limit {
                self.tolerance_counter += 1;
                tracing::trace!(counter = self.tolerance_counter, "tolerating missed frame");
            } else {
                actions.push(Action::ArmDisableTimer(self.config.disable_delay));
                actions.push(Action::StartBlink);
                self.disable_timer_armed = true;
                self.output_enabled = false;
                self.tolerance_counter = 0;
                tracing::info!(
                    delay_ms = self.config.disable_delay.as_millis() as u64,
                    "authorized face lost; disable pending"
                );
            }
        } else {
            // A single miss breaks an unconfirmed streak.
            self.tolerance_counter = 0;
        }

        actions
    }

    /// The delayed disable elapsed without being cancelled.
    pub fn on_disable_timer(&mut self) -> Vec<Action> {
        self.disable_timer_armed = false;
        tracing::info!("output disabled");
        vec![Action::StopBlink, Action::Disable]
    }

    /// Forget everything, e.g. on camera re-initialization.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}
