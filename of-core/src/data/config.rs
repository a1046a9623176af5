//! Device options: global defaults, per-fan overrides and profiles
//!
//! Options are strongly typed and resolved per fan into
//! [`EffectiveSettings`], the values a temperature controller acts on.
//!
//! # Resolution order
//!
//! 1. Global defaults.
//! 2. If the fan selects a known profile (custom names are looked up before
//!    built-in ones), its curve and timing replace the defaults.
//! 3. Per-fan `min_pwm`, `min_pwm_calibrated` and `temp_entity` always win.
//! 4. Per-fan curve and timing apply only when no profile is selected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::constants::defaults;
use crate::engine::Curve;

/// Current options schema version
pub const OPTIONS_VERSION: u32 = 2;

/// Keys that moved from the top level into `fans["0"]` in version 2
const LEGACY_PER_FAN_KEYS: &[&str] = &[
    "min_pwm",
    "min_pwm_calibrated",
    "temp_entity",
    "temp_curve",
    "temp_integrate_seconds",
    "temp_update_min_interval",
    "temp_deadband_pct",
];

/// Named bundle of curve and timing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub temp_curve: Curve,
    #[serde(default = "default_integrate")]
    pub temp_integrate_seconds: u64,
    #[serde(default = "default_min_interval")]
    pub temp_update_min_interval: u64,
    #[serde(default = "default_deadband")]
    pub temp_deadband_pct: u8,
}

/// The three profiles that ship with the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinProfile {
    Quiet,
    Balanced,
    Aggressive,
}

impl BuiltinProfile {
    pub const ALL: [BuiltinProfile; 3] = [Self::Quiet, Self::Balanced, Self::Aggressive];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn is_builtin(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    pub fn profile(&self) -> Profile {
        let (curve, integrate, interval, deadband) = match self {
            Self::Quiet => ("45=25, 60=55, 75=100", 60, 15, 5),
            Self::Balanced => ("45=35, 60=60, 70=100", 30, 10, 3),
            Self::Aggressive => ("45=40, 55=70, 65=100", 15, 5, 2),
        };
        Profile {
            temp_curve: Curve::parse(curve),
            temp_integrate_seconds: integrate,
            temp_update_min_interval: interval,
            temp_deadband_pct: deadband,
        }
    }
}

/// Per-fan overrides; `None` falls back to the global value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pwm: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pwm_calibrated: Option<bool>,
    /// `Some("")` disables the global temperature source for this fan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_curve: Option<Curve>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_integrate_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_update_min_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_deadband_pct: Option<u8>,
}

impl FanOptions {
    /// Selected profile name, ignoring blank values
    pub fn profile_name(&self) -> Option<&str> {
        self.profile
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Options for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOptions {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_stall_consecutive")]
    pub stall_consecutive: u32,
    #[serde(default)]
    pub min_pwm: u8,
    #[serde(default)]
    pub min_pwm_calibrated: bool,
    #[serde(default)]
    pub temp_entity: String,
    #[serde(default = "default_curve")]
    pub temp_curve: Curve,
    #[serde(default = "default_integrate")]
    pub temp_integrate_seconds: u64,
    #[serde(default = "default_min_interval")]
    pub temp_update_min_interval: u64,
    #[serde(default = "default_deadband")]
    pub temp_deadband_pct: u8,
    #[serde(default)]
    pub fans: BTreeMap<u8, FanOptions>,
    /// Custom profiles keyed by name
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

fn default_version() -> u32 {
    OPTIONS_VERSION
}

fn default_poll_interval() -> u64 {
    defaults::POLL_INTERVAL
}

fn default_failure_threshold() -> u32 {
    defaults::FAILURE_THRESHOLD
}

fn default_stall_consecutive() -> u32 {
    defaults::STALL_CONSECUTIVE
}

fn default_curve() -> Curve {
    Curve::parse(defaults::TEMP_CURVE)
}

fn default_integrate() -> u64 {
    defaults::TEMP_INTEGRATE_SECONDS
}

fn default_min_interval() -> u64 {
    defaults::TEMP_UPDATE_MIN_INTERVAL
}

fn default_deadband() -> u8 {
    defaults::TEMP_DEADBAND_PCT
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            version: OPTIONS_VERSION,
            poll_interval: defaults::POLL_INTERVAL,
            failure_threshold: defaults::FAILURE_THRESHOLD,
            stall_consecutive: defaults::STALL_CONSECUTIVE,
            min_pwm: defaults::MIN_PWM,
            min_pwm_calibrated: false,
            temp_entity: String::new(),
            temp_curve: default_curve(),
            temp_integrate_seconds: defaults::TEMP_INTEGRATE_SECONDS,
            temp_update_min_interval: defaults::TEMP_UPDATE_MIN_INTERVAL,
            temp_deadband_pct: defaults::TEMP_DEADBAND_PCT,
            fans: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }
}

/// Settings one fan's controller acts on after merging all layers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveSettings {
    pub min_pwm: u8,
    pub min_pwm_calibrated: bool,
    pub temp_entity: String,
    pub curve: Curve,
    /// Name of the applied profile, `None` for a custom curve
    pub profile: Option<String>,
    pub integrate_seconds: u64,
    pub min_update_interval: u64,
    pub deadband_pct: u8,
}

/// Built-in and custom profile names
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileList {
    pub builtin: Vec<String>,
    pub custom: Vec<String>,
}

impl DeviceOptions {
    /// Find a profile by name, custom profiles first
    pub fn lookup_profile(&self, name: &str) -> Option<Profile> {
        self.profiles
            .get(name)
            .cloned()
            .or_else(|| BuiltinProfile::from_name(name).map(|p| p.profile()))
    }

    pub fn fan(&self, index: u8) -> Option<&FanOptions> {
        self.fans.get(&index)
    }

    /// Per-fan options, created empty on first access
    pub fn fan_mut(&mut self, index: u8) -> &mut FanOptions {
        self.fans.entry(index).or_default()
    }

    /// Merge global, profile and per-fan layers for one fan
    pub fn resolve(&self, index: u8) -> EffectiveSettings {
        let empty = FanOptions::default();
        let fan = self.fans.get(&index).unwrap_or(&empty);

        let mut settings = EffectiveSettings {
            min_pwm: self.min_pwm,
            min_pwm_calibrated: self.min_pwm_calibrated,
            temp_entity: self.temp_entity.trim().to_string(),
            curve: self.temp_curve.clone(),
            profile: None,
            integrate_seconds: self.temp_integrate_seconds,
            min_update_interval: self.temp_update_min_interval,
            deadband_pct: self.temp_deadband_pct,
        };

        let profile = fan
            .profile_name()
            .and_then(|name| self.lookup_profile(name).map(|p| (name, p)));

        match profile {
            Some((name, profile)) => {
                settings.profile = Some(name.to_string());
                settings.curve = profile.temp_curve;
                settings.integrate_seconds = profile.temp_integrate_seconds;
                settings.min_update_interval = profile.temp_update_min_interval;
                settings.deadband_pct = profile.temp_deadband_pct;
            }
            None => {
                if let Some(curve) = fan.temp_curve.as_ref().filter(|c| !c.is_empty()) {
                    settings.curve = curve.clone();
                }
                if let Some(secs) = fan.temp_integrate_seconds {
                    settings.integrate_seconds = secs;
                }
                if let Some(secs) = fan.temp_update_min_interval {
                    settings.min_update_interval = secs;
                }
                if let Some(pct) = fan.temp_deadband_pct {
                    settings.deadband_pct = pct;
                }
            }
        }

        if let Some(min_pwm) = fan.min_pwm {
            settings.min_pwm = min_pwm;
        }
        if let Some(calibrated) = fan.min_pwm_calibrated {
            settings.min_pwm_calibrated = calibrated;
        }
        if let Some(entity) = fan.temp_entity.as_deref() {
            settings.temp_entity = entity.trim().to_string();
        }

        settings
    }

    /// Snapshot a fan's curve and timing as a profile
    ///
    /// Values not overridden on the fan come from the global options.
    pub fn profile_from_fan(&self, index: u8) -> Profile {
        let empty = FanOptions::default();
        let fan = self.fans.get(&index).unwrap_or(&empty);
        Profile {
            temp_curve: fan
                .temp_curve
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| self.temp_curve.clone()),
            temp_integrate_seconds: fan
                .temp_integrate_seconds
                .unwrap_or(self.temp_integrate_seconds),
            temp_update_min_interval: fan
                .temp_update_min_interval
                .unwrap_or(self.temp_update_min_interval),
            temp_deadband_pct: fan.temp_deadband_pct.unwrap_or(self.temp_deadband_pct),
        }
    }

    pub fn profile_list(&self) -> ProfileList {
        ProfileList {
            builtin: BuiltinProfile::ALL
                .iter()
                .map(|p| p.name().to_string())
                .collect(),
            custom: self.profiles.keys().cloned().collect(),
        }
    }
}

/// Upgrade stored options JSON to the current schema
///
/// Version 1 kept a single fan's settings at the top level. When no `fans`
/// map exists those keys are copied into `fans["0"]`; the top-level values
/// stay as global defaults.
pub fn migrate_legacy_options(mut value: Value) -> Value {
    let Some(obj) = value.as_object_mut() else {
        return value;
    };

    let version = obj.get("version").and_then(Value::as_u64).unwrap_or(1);
    if version >= u64::from(OPTIONS_VERSION) {
        return value;
    }

    if !obj.contains_key("fans") {
        let fan_zero: Map<String, Value> = LEGACY_PER_FAN_KEYS
            .iter()
            .filter_map(|key| obj.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        if !fan_zero.is_empty() {
            info!(
                "Migrated single-fan options to per-fan structure: {:?}",
                fan_zero.keys().collect::<Vec<_>>()
            );
            let mut fans = Map::new();
            fans.insert("0".to_string(), Value::Object(fan_zero));
            obj.insert("fans".to_string(), Value::Object(fans));
        }
    }

    obj.insert("version".to_string(), Value::from(OPTIONS_VERSION));
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calibrated_fan() -> FanOptions {
        FanOptions {
            min_pwm: Some(20),
            min_pwm_calibrated: Some(true),
            temp_entity: Some("sensor.cpu".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let options = DeviceOptions::default();
        assert_eq!(options.poll_interval, 5);
        assert_eq!(options.failure_threshold, 3);
        assert_eq!(options.stall_consecutive, 3);
        assert_eq!(options.temp_curve.to_string(), "45=25, 65=55, 70=100");
        assert_eq!(options.temp_deadband_pct, 3);
    }

    #[test]
    fn test_deserialize_empty_object_uses_defaults() {
        let options: DeviceOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, DeviceOptions::default());
    }

    #[test]
    fn test_resolve_global_only() {
        let options = DeviceOptions {
            temp_entity: " sensor.case ".into(),
            ..Default::default()
        };
        let settings = options.resolve(0);
        assert_eq!(settings.temp_entity, "sensor.case");
        assert_eq!(settings.profile, None);
        assert_eq!(settings.integrate_seconds, 30);
    }

    #[test]
    fn test_resolve_per_fan_overrides_without_profile() {
        let mut options = DeviceOptions::default();
        *options.fan_mut(1) = FanOptions {
            temp_curve: Some(Curve::parse("30=10, 80=90")),
            temp_integrate_seconds: Some(120),
            temp_deadband_pct: Some(0),
            ..calibrated_fan()
        };
        let settings = options.resolve(1);
        assert_eq!(settings.curve.to_string(), "30=10, 80=90");
        assert_eq!(settings.integrate_seconds, 120);
        assert_eq!(settings.deadband_pct, 0);
        assert_eq!(settings.min_update_interval, 10);
        assert_eq!(settings.min_pwm, 20);
        assert!(settings.min_pwm_calibrated);
    }

    #[test]
    fn test_profile_wins_over_fan_curve() {
        let mut options = DeviceOptions::default();
        *options.fan_mut(0) = FanOptions {
            profile: Some("quiet".into()),
            temp_curve: Some(Curve::parse("30=10, 80=90")),
            temp_deadband_pct: Some(0),
            ..calibrated_fan()
        };
        let settings = options.resolve(0);
        assert_eq!(settings.profile.as_deref(), Some("quiet"));
        assert_eq!(settings.curve.to_string(), "45=25, 60=55, 75=100");
        assert_eq!(settings.integrate_seconds, 60);
        assert_eq!(settings.min_update_interval, 15);
        assert_eq!(settings.deadband_pct, 5);
        // min_pwm, calibration and entity still come from the fan
        assert_eq!(settings.min_pwm, 20);
        assert_eq!(settings.temp_entity, "sensor.cpu");
    }

    #[test]
    fn test_custom_profile_shadows_lookup_order() {
        let mut options = DeviceOptions::default();
        options.profiles.insert(
            "night".into(),
            Profile {
                temp_curve: Curve::parse("40=20, 70=60"),
                temp_integrate_seconds: 90,
                temp_update_min_interval: 20,
                temp_deadband_pct: 4,
            },
        );
        options.fan_mut(0).profile = Some("night".into());
        let settings = options.resolve(0);
        assert_eq!(settings.integrate_seconds, 90);
        assert_eq!(settings.curve.to_string(), "40=20, 70=60");
    }

    #[test]
    fn test_unknown_profile_behaves_as_none() {
        let mut options = DeviceOptions::default();
        *options.fan_mut(0) = FanOptions {
            profile: Some("missing".into()),
            temp_curve: Some(Curve::parse("30=10, 80=90")),
            ..Default::default()
        };
        let settings = options.resolve(0);
        assert_eq!(settings.profile, None);
        assert_eq!(settings.curve.to_string(), "30=10, 80=90");
    }

    #[test]
    fn test_blank_fan_entity_disables_global() {
        let mut options = DeviceOptions {
            temp_entity: "sensor.case".into(),
            ..Default::default()
        };
        options.fan_mut(2).temp_entity = Some(String::new());
        assert_eq!(options.resolve(2).temp_entity, "");
        assert_eq!(options.resolve(3).temp_entity, "sensor.case");
    }

    #[test]
    fn test_profile_from_fan_falls_back_to_global() {
        let mut options = DeviceOptions::default();
        options.fan_mut(0).temp_deadband_pct = Some(7);
        let profile = options.profile_from_fan(0);
        assert_eq!(profile.temp_deadband_pct, 7);
        assert_eq!(profile.temp_integrate_seconds, 30);
        assert_eq!(profile.temp_curve, options.temp_curve);
    }

    #[test]
    fn test_profile_list() {
        let mut options = DeviceOptions::default();
        options
            .profiles
            .insert("night".into(), BuiltinProfile::Quiet.profile());
        let list = options.profile_list();
        assert_eq!(list.builtin, vec!["quiet", "balanced", "aggressive"]);
        assert_eq!(list.custom, vec!["night"]);
    }

    #[test]
    fn test_fan_keys_serialize_as_strings() {
        let mut options = DeviceOptions::default();
        options.fan_mut(3).alias = Some("rear".into());
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["fans"]["3"]["alias"], "rear");
        let back: DeviceOptions = serde_json::from_value(value).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_migrate_v1_moves_fan_keys() {
        let legacy = json!({
            "poll_interval": 7,
            "min_pwm": 25,
            "min_pwm_calibrated": true,
            "temp_entity": "sensor.cpu",
            "temp_curve": "40=30, 70=100"
        });
        let migrated = migrate_legacy_options(legacy);
        assert_eq!(migrated["version"], 2);
        assert_eq!(migrated["fans"]["0"]["min_pwm"], 25);
        assert_eq!(migrated["fans"]["0"]["temp_entity"], "sensor.cpu");
        assert_eq!(migrated["poll_interval"], 7);

        let options: DeviceOptions = serde_json::from_value(migrated).unwrap();
        let settings = options.resolve(0);
        assert_eq!(settings.min_pwm, 25);
        assert!(settings.min_pwm_calibrated);
    }

    #[test]
    fn test_migrate_keeps_existing_fans() {
        let legacy = json!({ "min_pwm": 25, "fans": { "1": { "min_pwm": 30 } } });
        let migrated = migrate_legacy_options(legacy);
        assert!(migrated["fans"].get("0").is_none());
        assert_eq!(migrated["version"], 2);
    }

    #[test]
    fn test_migrate_current_version_untouched() {
        let current = json!({ "version": 2, "min_pwm": 25 });
        assert_eq!(migrate_legacy_options(current.clone()), current);
    }
}
