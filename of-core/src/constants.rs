//! Constants and configuration values for the OpenFAN controller
//!
//! Centralizes endpoint paths, timing, limits and option defaults.
//! Other modules reference these rather than repeating literals.

use std::time::Duration;

/// Device HTTP API paths
pub mod endpoints {
    /// Multi-fan status (newer firmware)
    pub const STATUS_ALL: &str = "/api/v0/fan/status";

    /// Legacy single-fan status
    pub const STATUS_SINGLE: &str = "/api/v0/fan/0/status";

    /// Board status with LED and supply voltage flags
    pub const OPENFAN_STATUS: &str = "/api/v0/openfan/status";

    pub const LED_ENABLE: &str = "/api/v0/led/enable";
    pub const LED_DISABLE: &str = "/api/v0/led/disable";

    /// Voltage switches require `confirm=true`
    pub const VOLTAGE_HIGH: &str = "/api/v0/fan/voltage/high?confirm=true";
    pub const VOLTAGE_LOW: &str = "/api/v0/fan/voltage/low?confirm=true";

    /// PWM write variants, tried in order
    pub fn set_pwm_candidates(index: u8, value: u8) -> [String; 3] {
        [
            format!("/api/v0/fan/{index}/pwm?value={value}"),
            format!("/api/v0/fan/{index}/set?value={value}"),
            format!("/api/v0/fan/set?value={value}"),
        ]
    }

    pub fn set_pwm_all(value: u8) -> String {
        format!("/api/v0/fan/all/set?value={value}")
    }

    pub fn set_rpm(index: u8, value: u32) -> String {
        format!("/api/v0/fan/{index}/rpm?value={value}")
    }
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Ceiling for every device HTTP request
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(6);

    /// Floor for the periodic temperature apply interval
    pub const MIN_PERIODIC_APPLY_SECS: u64 = 5;

    /// Floor for the per-step settle time during calibration
    pub const MIN_CALIBRATION_SETTLE_SECS: u64 = 1;
}

/// Hard limits
pub mod limits {
    /// Highest fan index a board reports (10-channel OpenFAN)
    pub const MAX_FAN_INDEX: u8 = 9;

    /// Sample window capacity; oldest entries are evicted first
    pub const WINDOW_CAPACITY: usize = 512;

    /// Averaging window never shrinks below this many seconds
    pub const MIN_WINDOW_SECS: u64 = 5;

    /// Min-update-interval gate never drops below this many seconds
    pub const MIN_UPDATE_INTERVAL_SECS: u64 = 1;

    pub const PWM_MAX: u8 = 100;
}

/// Option defaults and accepted ranges
pub mod defaults {
    use std::ops::RangeInclusive;

    pub const POLL_INTERVAL: u64 = 5;
    pub const POLL_INTERVAL_RANGE: RangeInclusive<u64> = 2..=60;

    pub const FAILURE_THRESHOLD: u32 = 3;
    pub const FAILURE_THRESHOLD_RANGE: RangeInclusive<u32> = 1..=10;

    pub const STALL_CONSECUTIVE: u32 = 3;
    pub const STALL_CONSECUTIVE_RANGE: RangeInclusive<u32> = 1..=10;

    pub const MIN_PWM: u8 = 0;
    pub const MIN_PWM_RANGE: RangeInclusive<u8> = 0..=60;

    pub const TEMP_CURVE: &str = "45=25, 65=55, 70=100";

    pub const TEMP_INTEGRATE_SECONDS: u64 = 30;
    pub const TEMP_INTEGRATE_RANGE: RangeInclusive<u64> = 5..=900;

    pub const TEMP_UPDATE_MIN_INTERVAL: u64 = 10;
    pub const TEMP_UPDATE_MIN_INTERVAL_RANGE: RangeInclusive<u64> = 2..=300;

    pub const TEMP_DEADBAND_PCT: u8 = 3;
    pub const TEMP_DEADBAND_RANGE: RangeInclusive<u8> = 0..=20;
}

/// Minimum-PWM calibration sweep defaults
pub mod calibration {
    pub const FROM_PCT: u8 = 10;
    pub const TO_PCT: u8 = 40;
    pub const STEP: u8 = 5;
    pub const RPM_THRESHOLD: u32 = 100;
    pub const MARGIN: u8 = 5;
}

/// Device identity strings
pub mod device {
    pub const MANUFACTURER: &str = "Karanovic Research";
    pub const MODEL_MULTI: &str = "OpenFAN";
    pub const MODEL_MICRO: &str = "OpenFAN Micro";

    /// Event name fired on a stall rising edge
    pub const STALL_EVENT: &str = "openfan_micro_stall";
}

/// Config file locations
pub mod paths {
    use std::path::PathBuf;

    /// Environment variable that overrides the config file path
    pub const CONFIG_ENV: &str = "OPENFAN_CONFIG";

    pub const CONFIG_FILE: &str = "config.json";

    /// User configuration directory (`$XDG_CONFIG_HOME/openfan`)
    pub fn user_config_dir() -> Option<PathBuf> {
        let base = if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            Some(PathBuf::from(xdg))
        } else if let Ok(home) = std::env::var("HOME") {
            Some(PathBuf::from(home).join(".config"))
        } else {
            dirs::config_dir()
        };
        base.map(|p| p.join("openfan"))
    }

    /// Config file path, honoring `OPENFAN_CONFIG`
    pub fn config_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            if !explicit.trim().is_empty() {
                return Some(PathBuf::from(explicit));
            }
        }
        user_config_dir().map(|d| d.join(CONFIG_FILE))
    }
}
