//! Core data types shared by the client, coordinator and device facade

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::device;

/// Per-fan status published each poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanRuntimeStatus {
    pub rpm: u32,
    /// Last PWM written by this process; firmware does not always echo it
    pub pwm: u8,
    pub stalled: bool,
}

/// Immutable result of one successful poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub fans: BTreeMap<u8, FanRuntimeStatus>,
    pub led_on: bool,
    pub is_12v: bool,
}

impl DeviceSnapshot {
    pub fn fan(&self, index: u8) -> Option<&FanRuntimeStatus> {
        self.fans.get(&index)
    }

    /// RPM for a fan, 0 when the fan was not reported
    pub fn rpm(&self, index: u8) -> u32 {
        self.fans.get(&index).map(|f| f.rpm).unwrap_or(0)
    }
}

/// LED and supply voltage flags from the board status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardStatus {
    pub led_on: bool,
    pub is_12v: bool,
}

/// Poll failure bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FaultState {
    pub consecutive_failures: u32,
    pub forced_unavailable: bool,
    pub last_error: Option<String>,
    pub stall_counters: BTreeMap<u8, u32>,
    pub stall_notified: BTreeMap<u8, bool>,
}

/// Coordinator availability as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Last poll succeeded
    Healthy,
    /// Recent polls failed but the threshold is not reached
    Degraded,
    ForcedUnavailable,
}

impl FaultState {
    pub fn availability(&self) -> Availability {
        if self.forced_unavailable {
            Availability::ForcedUnavailable
        } else if self.consecutive_failures > 0 {
            Availability::Degraded
        } else {
            Availability::Healthy
        }
    }
}

/// One-shot notification raised on a stall rising edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StallEvent {
    pub host: String,
    pub fan_index: u8,
    pub pwm: u8,
}

impl StallEvent {
    /// Event type name hosts fire this under
    pub fn kind(&self) -> &'static str {
        device::STALL_EVENT
    }

    pub fn message(&self) -> String {
        format!(
            "Fan looks stalled on {} (Fan {}, PWM={}%, RPM=0)",
            self.host, self.fan_index, self.pwm
        )
    }
}

/// Identity of a device for display and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub mac: Option<String>,
    pub manufacturer: String,
    pub model: String,
    pub fan_count: usize,
}
