//! Validation for device options
//!
//! Options are validated whenever they are loaded or replaced. Ranges match
//! what the options form accepts.

use std::fmt::Display;
use std::ops::RangeInclusive;

use crate::constants::{defaults, limits};
use crate::data::config::{DeviceOptions, FanOptions, Profile};
use crate::error::{OpenFanError, Result};

fn check_range<T>(field: &str, value: T, range: RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + Display + Copy,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(OpenFanError::invalid_config(
            field,
            format!("{value} is outside {}-{}", range.start(), range.end()),
        ))
    }
}

/// Validates a fan index against the largest board
pub fn validate_fan_index(index: u8) -> Result<u8> {
    if index > limits::MAX_FAN_INDEX {
        return Err(OpenFanError::UnknownFan(index));
    }
    Ok(index)
}

/// Validates a profile name for saving
pub fn validate_profile_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(OpenFanError::invalid_config("profile", "name is required"));
    }
    Ok(name)
}

pub fn validate_profile(name: &str, profile: &Profile) -> Result<()> {
    validate_profile_name(name)?;
    if profile.temp_curve.is_empty() {
        return Err(OpenFanError::invalid_config(
            format!("profiles.{name}.temp_curve"),
            "curve has no valid points",
        ));
    }
    check_range(
        "temp_integrate_seconds",
        profile.temp_integrate_seconds,
        defaults::TEMP_INTEGRATE_RANGE,
    )?;
    check_range(
        "temp_update_min_interval",
        profile.temp_update_min_interval,
        defaults::TEMP_UPDATE_MIN_INTERVAL_RANGE,
    )?;
    check_range(
        "temp_deadband_pct",
        profile.temp_deadband_pct,
        defaults::TEMP_DEADBAND_RANGE,
    )
}

fn validate_fan(index: u8, fan: &FanOptions) -> Result<()> {
    validate_fan_index(index)?;
    if let Some(min_pwm) = fan.min_pwm {
        // Calibration may land above the form's range (found step + margin)
        check_range("min_pwm", min_pwm, 0..=limits::PWM_MAX)?;
    }
    if let Some(secs) = fan.temp_integrate_seconds {
        check_range("temp_integrate_seconds", secs, defaults::TEMP_INTEGRATE_RANGE)?;
    }
    if let Some(secs) = fan.temp_update_min_interval {
        check_range(
            "temp_update_min_interval",
            secs,
            defaults::TEMP_UPDATE_MIN_INTERVAL_RANGE,
        )?;
    }
    if let Some(pct) = fan.temp_deadband_pct {
        check_range("temp_deadband_pct", pct, defaults::TEMP_DEADBAND_RANGE)?;
    }
    Ok(())
}

/// Validates a whole options set
pub fn validate_options(options: &DeviceOptions) -> Result<()> {
    check_range("poll_interval", options.poll_interval, defaults::POLL_INTERVAL_RANGE)?;
    check_range(
        "failure_threshold",
        options.failure_threshold,
        defaults::FAILURE_THRESHOLD_RANGE,
    )?;
    check_range(
        "stall_consecutive",
        options.stall_consecutive,
        defaults::STALL_CONSECUTIVE_RANGE,
    )?;
    check_range("min_pwm", options.min_pwm, defaults::MIN_PWM_RANGE)?;
    check_range(
        "temp_integrate_seconds",
        options.temp_integrate_seconds,
        defaults::TEMP_INTEGRATE_RANGE,
    )?;
    check_range(
        "temp_update_min_interval",
        options.temp_update_min_interval,
        defaults::TEMP_UPDATE_MIN_INTERVAL_RANGE,
    )?;
    check_range(
        "temp_deadband_pct",
        options.temp_deadband_pct,
        defaults::TEMP_DEADBAND_RANGE,
    )?;

    for (index, fan) in &options.fans {
        validate_fan(*index, fan)?;
    }
    for (name, profile) in &options.profiles {
        validate_profile(name, profile)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::BuiltinProfile;
    use crate::engine::Curve;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_options(&DeviceOptions::default()).is_ok());
    }

    #[test]
    fn test_poll_interval_range() {
        let mut options = DeviceOptions::default();
        options.poll_interval = 1;
        let err = validate_options(&options).unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
        options.poll_interval = 60;
        assert!(validate_options(&options).is_ok());
    }

    #[test]
    fn test_global_min_pwm_range() {
        let mut options = DeviceOptions::default();
        options.min_pwm = 61;
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn test_calibrated_fan_min_pwm_above_form_range() {
        let mut options = DeviceOptions::default();
        options.fan_mut(0).min_pwm = Some(75);
        assert!(validate_options(&options).is_ok());
    }

    #[test]
    fn test_fan_index_limit() {
        let mut options = DeviceOptions::default();
        options.fan_mut(10);
        assert!(matches!(
            validate_options(&options),
            Err(OpenFanError::UnknownFan(10))
        ));
    }

    #[test]
    fn test_profile_requires_points() {
        let mut options = DeviceOptions::default();
        let mut profile = BuiltinProfile::Balanced.profile();
        profile.temp_curve = Curve::parse("nonsense");
        options.profiles.insert("broken".into(), profile);
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn test_profile_name_required() {
        assert!(validate_profile_name("   ").is_err());
        assert_eq!(validate_profile_name(" night ").unwrap(), "night");
    }

    #[test]
    fn test_fan_deadband_range() {
        let mut options = DeviceOptions::default();
        options.fan_mut(0).temp_deadband_pct = Some(21);
        assert!(validate_options(&options).is_err());
    }
}
