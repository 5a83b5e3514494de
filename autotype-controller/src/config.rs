//! Controller configuration

use std::time::Duration;

use autotype_common::HidMode;
use serde::{Deserialize, Serialize};

/// Settle delays and timeouts, in milliseconds.
///
/// The settle delays cover unspecified platform timing; only the ordering
/// they separate is required. Tests use [`TimingConfig::immediate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Between an acknowledged unregister and the next register
    pub mode_switch_settle_ms: u64,
    /// Between a host connecting and the first keyboard report
    pub connect_settle_ms: u64,
    /// Between the last keyboard report and reverting to the idle mode
    pub post_send_settle_ms: u64,
    /// Wait for the platform to answer register/unregister
    pub registration_timeout_ms: u64,
    /// Wait for the dispatch target to connect
    pub connect_timeout_ms: u64,
    /// Minimum gap between two "open safe" requests from the FIDO relay
    pub open_file_debounce_ms: u64,
    /// Auto-dismiss hint for the action-required notification
    pub action_notification_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            mode_switch_settle_ms: 50,
            connect_settle_ms: 100,
            post_send_settle_ms: 500,
            registration_timeout_ms: 2_000,
            connect_timeout_ms: 10_000,
            open_file_debounce_ms: 20_000,
            action_notification_timeout_ms: 10_000,
        }
    }
}

impl TimingConfig {
    /// No settle delays; timeouts keep their defaults
    pub fn immediate() -> Self {
        Self {
            mode_switch_settle_ms: 0,
            connect_settle_ms: 0,
            post_send_settle_ms: 0,
            ..Default::default()
        }
    }

    pub fn mode_switch_settle(&self) -> Duration {
        Duration::from_millis(self.mode_switch_settle_ms)
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn post_send_settle(&self) -> Duration {
        Duration::from_millis(self.post_send_settle_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn open_file_debounce(&self) -> Duration {
        Duration::from_millis(self.open_file_debounce_ms)
    }

    pub fn action_notification_timeout(&self) -> Duration {
        Duration::from_millis(self.action_notification_timeout_ms)
    }
}

/// Mode the profile returns to after a keyboard dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleMode {
    /// Listen for FIDO requests
    #[default]
    Fido,
    Keyboard,
    /// Stay in whatever mode the dispatch left
    Unchanged,
}

impl IdleMode {
    pub fn mode(&self) -> Option<HidMode> {
        match self {
            IdleMode::Fido => Some(HidMode::Fido),
            IdleMode::Keyboard => Some(HidMode::Keyboard),
            IdleMode::Unchanged => None,
        }
    }
}

/// HID device controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Allow registering the FIDO security key profile
    pub fido_enabled: bool,
    pub idle_mode: IdleMode,
    pub timing: TimingConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self {
            fido_enabled: true,
            idle_mode: IdleMode::Fido,
            timing: TimingConfig::default(),
        }
    }

    /// Defaults without settle delays, for tests and simulation
    pub fn immediate() -> Self {
        Self {
            timing: TimingConfig::immediate(),
            ..Self::new()
        }
    }
}
