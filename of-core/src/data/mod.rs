//! Data types, options and validation modules

pub mod config;
mod store;
mod types;
pub mod validation;

pub use config::{
    migrate_legacy_options, BuiltinProfile, DeviceOptions, EffectiveSettings, FanOptions,
    Profile, ProfileList, OPTIONS_VERSION,
};
pub use store::{write_json_atomic, MemoryPersister, OptionsPersister, OptionsStore};
pub use types::{
    Availability, BoardStatus, DeviceInfo, DeviceSnapshot, FanRuntimeStatus, FaultState,
    StallEvent,
};
pub use validation::{validate_fan_index, validate_options, validate_profile_name};
