//! OpenFAN Core Library
//!
//! Controller core for OpenFAN and OpenFAN Micro fan boards driven over
//! their HTTP API.
//!
//! # Features
//!
//! - **Device Client**: Endpoint fallback and payload normalization across firmware revisions
//! - **Polling**: Snapshots, availability tracking and edge-triggered stall detection
//! - **Temperature Control**: Curve evaluation over a time-averaged temperature with hysteresis
//! - **Calibration**: Minimum-PWM sweep per fan
//! - **Configuration**: Typed options with per-fan overrides and named profiles
//!
//! # Module Structure
//!
//! - `api/` - HTTP transport and device client
//! - `data/` - Data types, options, validation
//! - `engine/` - Curves, sample window, fan temperature controller
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use of_core::{
//!     DeviceClient, DeviceOptions, HttpTransport, LogStallNotifier, OpenFanDevice,
//!     OptionsStore, TempHub,
//! };
//!
//! # async fn run() -> of_core::Result<()> {
//! let transport = Arc::new(HttpTransport::new("192.168.1.50")?);
//! let device = OpenFanDevice::new(
//!     Arc::new(DeviceClient::new(transport)),
//!     Arc::new(OptionsStore::in_memory(DeviceOptions::default())?),
//!     Arc::new(TempHub::new()),
//!     Arc::new(LogStallNotifier),
//! );
//! device.first_refresh().await?;
//! device.start_temp_control().await?;
//! # Ok(())
//! # }
//! ```

// Grouped modules
pub mod api;
pub mod data;
pub mod engine;

// Standalone modules
pub mod constants;
pub mod coordinator;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod temp;
pub mod test_utils;

// Re-export client types from api/
pub use api::{
    normalize_base_url, parse_base_url, DeviceClient, HttpTransport, RawResponse, Transport,
};

// Re-export data types and options from data/
pub use data::{
    migrate_legacy_options, Availability, BoardStatus, BuiltinProfile, DeviceInfo,
    DeviceOptions, DeviceSnapshot, EffectiveSettings, FanOptions, FanRuntimeStatus, FaultState,
    Profile, ProfileList, StallEvent, OPTIONS_VERSION,
};

// Re-export options storage from data/
pub use data::{write_json_atomic, MemoryPersister, OptionsPersister, OptionsStore};

// Re-export validation functions from data/
pub use data::{validate_fan_index, validate_options, validate_profile_name};

// Re-export error types
pub use error::{OpenFanError, Result};

// Re-export engine types
pub use engine::{
    clamp_target, interpolate, ApplyOutcome, CalibrationGuard, Curve, CurvePoint,
    FanControllerState, FanTempController, HoldReason, PwmWriter, SampleWindow,
};

// Re-export coordinator and device facade
pub use coordinator::{LogStallNotifier, PollingCoordinator, StallNotifier};
pub use device::{CalibrationRequest, DeviceStatus, OpenFanDevice, TempControlUpdate};
pub use diagnostics::Diagnostics;

// Re-export temperature feed
pub use temp::{TempHub, TempReading};
