//! Daemon configuration file
//!
//! One JSON file describes the board to talk to, where temperature
//! readings come from and the device options. Option changes made at run
//! time (calibration, profiles, temperature control) are written back to
//! the same file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use of_core::constants::paths;
use of_core::{
    migrate_legacy_options, parse_base_url, validate_options, write_json_atomic, DeviceOptions,
    OptionsPersister,
};
use of_error::{OpenFanError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

fn default_temp_feed_interval() -> u64 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Board address, with or without scheme
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Known fan count, seeds discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_count: Option<usize>,
    /// Entity id -> hwmon `temp*_input` file (millidegrees)
    #[serde(default)]
    pub temp_sources: BTreeMap<String, PathBuf>,
    /// Seconds between temperature source reads
    #[serde(default = "default_temp_feed_interval")]
    pub temp_feed_interval: u64,
    #[serde(default)]
    pub options: DeviceOptions,
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        parse_base_url(&self.host)?;
        if self.temp_feed_interval == 0 {
            return Err(OpenFanError::invalid_config(
                "temp_feed_interval",
                "must be at least 1 second",
            ));
        }
        for (entity, path) in &self.temp_sources {
            if entity.trim().is_empty() {
                return Err(OpenFanError::invalid_config(
                    "temp_sources",
                    format!("blank entity id for {}", path.display()),
                ));
            }
        }
        validate_options(&self.options)
    }

    /// Parse config JSON, upgrading legacy options first
    pub fn from_json(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Some(obj) = value.as_object_mut() {
            if let Some(options) = obj.remove("options") {
                obj.insert("options".to_string(), migrate_legacy_options(options));
            }
        }
        let config: DaemonConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Fields that only take effect on restart, compared with another config
    pub fn restart_fields_differ(&self, other: &DaemonConfig) -> bool {
        self.host != other.host
            || self.fan_count != other.fan_count
            || self.temp_sources != other.temp_sources
            || self.temp_feed_interval != other.temp_feed_interval
    }
}

/// Config path: explicit override, then `OPENFAN_CONFIG`, then the user
/// config directory
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    paths::config_file().ok_or_else(|| {
        OpenFanError::config(format!(
            "no config path: set {} or pass --config",
            paths::CONFIG_ENV
        ))
    })
}

pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let text = fs::read_to_string(path).map_err(|e| OpenFanError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config = DaemonConfig::from_json(&text)?;
    debug!("Loaded config from {:?}", path);
    Ok(config)
}

#[cfg(test)]
fn save_config(path: &Path, config: &DaemonConfig) -> Result<()> {
    config.validate()?;
    write_json_atomic(path, config)?;
    debug!("Saved config to {:?}", path);
    Ok(())
}

/// Notices edits to the config file made by other processes
///
/// Compares file content, so a write that leaves the file unchanged is not
/// reported.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last: Option<String>,
}

impl ConfigWatcher {
    /// Start from the file's current content
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last = fs::read_to_string(&path).ok();
        Self { path, last }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The new config, if the file changed since the last check
    ///
    /// A file that fails to parse is reported once until it changes again.
    pub fn check(&mut self) -> Result<Option<DaemonConfig>> {
        let text = fs::read_to_string(&self.path).map_err(|e| OpenFanError::FileRead {
            path: self.path.clone(),
            source: e,
        })?;
        if self.last.as_deref() == Some(text.as_str()) {
            return Ok(None);
        }
        let config = DaemonConfig::from_json(&text);
        self.last = Some(text);
        config.map(Some)
    }
}

/// Writes option changes back into the config file
pub struct FilePersister {
    path: PathBuf,
    base: DaemonConfig,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>, base: DaemonConfig) -> Self {
        Self {
            path: path.into(),
            base,
        }
    }
}

impl OptionsPersister for FilePersister {
    fn persist(&self, options: &DeviceOptions) -> Result<()> {
        let config = DaemonConfig {
            options: options.clone(),
            ..self.base.clone()
        };
        write_json_atomic(&self.path, &config)?;
        debug!("Persisted options to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use of_core::OptionsStore;
    use serial_test::serial;
    use std::sync::Arc;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"{"host": "192.168.1.50"}"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = DaemonConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.host, "192.168.1.50");
        assert_eq!(config.temp_feed_interval, 2);
        assert!(config.temp_sources.is_empty());
        assert_eq!(config.options, DeviceOptions::default());
    }

    #[test]
    fn test_blank_host_rejected() {
        assert!(matches!(
            DaemonConfig::from_json(r#"{"host": "  "}"#),
            Err(OpenFanError::InvalidConfig { ref field, .. }) if field == "host"
        ));
    }

    #[test]
    fn test_https_host_rejected() {
        assert!(matches!(
            DaemonConfig::from_json(r#"{"host": "https://fan.local"}"#),
            Err(OpenFanError::InvalidConfig { ref field, .. }) if field == "host"
        ));
    }

    #[test]
    fn test_out_of_range_option_rejected() {
        let text = r#"{"host": "fan.local", "options": {"poll_interval": 1}}"#;
        assert!(DaemonConfig::from_json(text).is_err());
    }

    #[test]
    fn test_legacy_options_migrated() {
        let text = r#"{
            "host": "fan.local",
            "options": {
                "min_pwm": 20,
                "min_pwm_calibrated": true,
                "temp_entity": "sensor.cpu",
                "temp_curve": "40=20, 70=100"
            }
        }"#;
        let config = DaemonConfig::from_json(text).unwrap();
        let fan = config.options.fan(0).unwrap();
        assert_eq!(fan.min_pwm, Some(20));
        assert_eq!(fan.min_pwm_calibrated, Some(true));
        assert_eq!(fan.temp_entity.as_deref(), Some("sensor.cpu"));
        assert_eq!(config.options.version, 2);
    }

    #[test]
    fn test_persister_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("openfan").join("config.json");
        let mut base = DaemonConfig::from_json(MINIMAL).unwrap();
        base.temp_sources
            .insert("sensor.cpu".into(), "/sys/class/hwmon/hwmon2/temp1_input".into());
        save_config(&path, &base).unwrap();

        let store = OptionsStore::new(
            base.options.clone(),
            Arc::new(FilePersister::new(&path, base.clone())),
        )
        .unwrap();
        store
            .update(|opts| {
                opts.fan_mut(1).min_pwm = Some(30);
                Ok(())
            })
            .unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.host, base.host);
        assert_eq!(loaded.temp_sources, base.temp_sources);
        assert_eq!(loaded.options.fan(1).unwrap().min_pwm, Some(30));
    }

    #[test]
    fn test_watcher_reports_changes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, MINIMAL).unwrap();
        let mut watcher = ConfigWatcher::new(&path);
        assert!(watcher.check().unwrap().is_none());

        let mut edited = DaemonConfig::from_json(MINIMAL).unwrap();
        edited.options.fan_mut(0).profile = Some("quiet".into());
        save_config(&path, &edited).unwrap();
        assert_eq!(watcher.check().unwrap(), Some(edited.clone()));
        assert!(watcher.check().unwrap().is_none());

        fs::write(&path, r#"{"host": "fan.local", "options": {"poll_interval": 0}}"#).unwrap();
        assert!(watcher.check().is_err());
        assert!(watcher.check().unwrap().is_none());

        // Restoring the same content as before still counts as a change
        save_config(&path, &edited).unwrap();
        assert_eq!(watcher.check().unwrap(), Some(edited));
    }

    #[test]
    fn test_restart_fields() {
        let base = DaemonConfig::from_json(MINIMAL).unwrap();
        let mut other = base.clone();
        other.options.poll_interval = 10;
        assert!(!base.restart_fields_differ(&other));
        other.temp_feed_interval = 5;
        assert!(base.restart_fields_differ(&other));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(
            load_config(&path),
            Err(OpenFanError::FileRead { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_config_path_resolution() {
        let explicit = PathBuf::from("/etc/openfan.json");
        assert_eq!(
            resolve_config_path(Some(&explicit)).unwrap(),
            explicit
        );

        std::env::set_var(paths::CONFIG_ENV, "/tmp/openfan-test.json");
        assert_eq!(
            resolve_config_path(None).unwrap(),
            PathBuf::from("/tmp/openfan-test.json")
        );
        std::env::remove_var(paths::CONFIG_ENV);

        std::env::set_var("XDG_CONFIG_HOME", "/tmp/xdg");
        assert_eq!(
            resolve_config_path(None).unwrap(),
            PathBuf::from("/tmp/xdg/openfan/config.json")
        );
        std::env::remove_var("XDG_CONFIG_HOME");
    }
}
