//! Diagnostics dump
//!
//! Everything needed to debug a device in one serializable value: identity,
//! options, the last snapshot, fault counters and controller state.

use serde::Serialize;

use crate::data::{
    Availability, DeviceInfo, DeviceOptions, DeviceSnapshot, FaultState, ProfileList,
};
use crate::engine::FanControllerState;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub device: DeviceInfo,
    pub options: DeviceOptions,
    pub snapshot: Option<DeviceSnapshot>,
    pub availability: Availability,
    pub fault: FaultState,
    pub controllers: Vec<FanControllerState>,
    pub profiles: ProfileList,
}

impl Diagnostics {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
