//! Device facade
//!
//! [`OpenFanDevice`] ties one board's client, coordinator, options and
//! per-fan controllers together and exposes the operations a host calls:
//! manual PWM, LED and voltage switches, calibration, temperature control
//! configuration and profiles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::DeviceClient;
use crate::constants::{calibration, device, limits, timing};
use crate::coordinator::{PollingCoordinator, StallNotifier};
use crate::data::{
    validate_fan_index, validate_profile_name, Availability, BuiltinProfile, DeviceInfo,
    DeviceOptions, DeviceSnapshot, OptionsStore, ProfileList,
};
use crate::diagnostics::Diagnostics;
use crate::engine::{ApplyOutcome, Curve, FanControllerState, FanTempController, PwmWriter};
use crate::error::{OpenFanError, Result};
use crate::temp::TempHub;

/// Parameters of a minimum-PWM sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationRequest {
    pub from_pct: u8,
    pub to_pct: u8,
    pub step: u8,
    pub rpm_threshold: u32,
    pub margin: u8,
}

impl Default for CalibrationRequest {
    fn default() -> Self {
        Self {
            from_pct: calibration::FROM_PCT,
            to_pct: calibration::TO_PCT,
            step: calibration::STEP,
            rpm_threshold: calibration::RPM_THRESHOLD,
            margin: calibration::MARGIN,
        }
    }
}

impl CalibrationRequest {
    fn validate(&self) -> Result<()> {
        let reason = if self.step == 0 {
            "step must be at least 1"
        } else if self.from_pct > self.to_pct {
            "from_pct is above to_pct"
        } else if self.to_pct > limits::PWM_MAX {
            "to_pct is above 100"
        } else {
            return Ok(());
        };
        Err(OpenFanError::InvalidCalibration {
            reason: reason.to_string(),
        })
    }

    /// PWM steps of the sweep, `from..=to`
    fn steps(&self) -> impl Iterator<Item = u8> {
        (self.from_pct..=self.to_pct).step_by(usize::from(self.step.max(1)))
    }
}

/// Per-fan temperature control changes; `None` leaves a value alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempControlUpdate {
    /// Blank disables temperature control for the fan
    pub temp_entity: Option<String>,
    /// Setting a curve deselects the fan's profile
    pub temp_curve: Option<String>,
    pub temp_integrate_seconds: Option<u64>,
    pub temp_update_min_interval: Option<u64>,
    pub temp_deadband_pct: Option<u8>,
}

/// Writes controller decisions to the board, then refreshes
struct DevicePwmWriter {
    client: Arc<DeviceClient>,
    coordinator: Arc<PollingCoordinator>,
}

#[async_trait]
impl PwmWriter for DevicePwmWriter {
    async fn write_pwm(&self, fan_index: u8, percent: u8) -> Result<()> {
        self.client.set_pwm_index(fan_index, percent).await?;
        if let Err(e) = self.coordinator.refresh().await {
            debug!(
                "OpenFAN {}: refresh after temp-control write failed: {}",
                self.client.host(),
                e
            );
        }
        Ok(())
    }
}

/// One OpenFAN board and its fan controllers
pub struct OpenFanDevice {
    name: String,
    mac: Option<String>,
    client: Arc<DeviceClient>,
    coordinator: Arc<PollingCoordinator>,
    options: Arc<OptionsStore>,
    temps: Arc<TempHub>,
    writer: Arc<DevicePwmWriter>,
    controllers: Mutex<BTreeMap<u8, Arc<FanTempController>>>,
}

impl OpenFanDevice {
    pub fn new(
        client: Arc<DeviceClient>,
        options: Arc<OptionsStore>,
        temps: Arc<TempHub>,
        notifier: Arc<dyn StallNotifier>,
    ) -> Self {
        let coordinator = Arc::new(PollingCoordinator::new(
            Arc::clone(&client),
            Arc::clone(&options),
            notifier,
        ));
        let writer = Arc::new(DevicePwmWriter {
            client: Arc::clone(&client),
            coordinator: Arc::clone(&coordinator),
        });
        Self {
            name: format!("{} {}", device::MODEL_MICRO, client.host()),
            mac: None,
            client,
            coordinator,
            options,
            temps,
            writer,
            controllers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.name = name;
        }
        self
    }

    pub fn with_mac(mut self, mac: Option<String>) -> Self {
        self.mac = mac.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn host(&self) -> &str {
        self.client.host()
    }

    pub fn client(&self) -> &Arc<DeviceClient> {
        &self.client
    }

    pub fn coordinator(&self) -> &Arc<PollingCoordinator> {
        &self.coordinator
    }

    pub fn options(&self) -> &Arc<OptionsStore> {
        &self.options
    }

    pub fn temps(&self) -> &Arc<TempHub> {
        &self.temps
    }

    pub fn device_info(&self) -> DeviceInfo {
        let fan_count = self.client.fan_count();
        DeviceInfo {
            name: self.name.clone(),
            host: self.host().to_string(),
            mac: self.mac.clone(),
            manufacturer: device::MANUFACTURER.to_string(),
            model: if fan_count > 1 {
                device::MODEL_MULTI
            } else {
                device::MODEL_MICRO
            }
            .to_string(),
            fan_count,
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// First poll during setup; a failure aborts setup
    pub async fn first_refresh(&self) -> Result<Arc<DeviceSnapshot>> {
        let snapshot = self.coordinator.refresh().await?;
        info!(
            "OpenFAN {} ready: {} fan(s), model {}",
            self.host(),
            self.client.fan_count(),
            self.device_info().model
        );
        Ok(snapshot)
    }

    pub async fn refresh_now(&self) -> Result<Arc<DeviceSnapshot>> {
        self.coordinator.refresh().await
    }

    pub fn snapshot(&self) -> Option<Arc<DeviceSnapshot>> {
        self.coordinator.snapshot()
    }

    pub fn availability(&self) -> Availability {
        self.coordinator.availability()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.options.read(|opts| opts.poll_interval))
    }

    /// Period of the background apply for all fans
    pub fn periodic_apply_interval(&self) -> Duration {
        let secs = self.options.read(|opts| opts.temp_update_min_interval);
        Duration::from_secs(secs.max(timing::MIN_PERIODIC_APPLY_SECS))
    }

    // ========================================================================
    // Temperature control
    // ========================================================================

    /// Controller for a fan, created on first use
    pub fn controller(&self, fan_index: u8) -> Result<Arc<FanTempController>> {
        validate_fan_index(fan_index)?;
        let mut controllers = self.controllers.lock();
        let controller = controllers.entry(fan_index).or_insert_with(|| {
            Arc::new(FanTempController::new(
                fan_index,
                self.client.host(),
                Arc::clone(&self.options),
                Arc::clone(&self.temps),
                self.writer.clone(),
            ))
        });
        Ok(Arc::clone(controller))
    }

    /// Fans with a controller: every discovered fan plus configured ones
    fn known_fans(&self) -> Vec<u8> {
        let discovered = self.client.fan_count().min(usize::from(limits::MAX_FAN_INDEX) + 1);
        let mut fans: Vec<u8> = (0..discovered as u8).collect();
        self.options.read(|opts| {
            fans.extend(
                opts.fans
                    .keys()
                    .filter(|index| **index <= limits::MAX_FAN_INDEX),
            )
        });
        fans.sort_unstable();
        fans.dedup();
        fans
    }

    /// Subscribe every fan to its temperature source and apply once
    pub async fn start_temp_control(&self) -> Result<()> {
        self.sync_temp_control("startup").await
    }

    /// Adopt options changed outside this process
    ///
    /// Subscriptions follow the new temperature sources and every fan is
    /// re-applied. Returns false when the options were already current.
    pub async fn reload_options(&self, options: DeviceOptions) -> Result<bool> {
        if !self.options.replace(options)? {
            debug!("OpenFAN {} options unchanged, nothing to reload", self.host());
            return Ok(false);
        }
        info!("OpenFAN {} options reloaded", self.host());
        self.sync_temp_control("options_reloaded").await?;
        Ok(true)
    }

    async fn sync_temp_control(&self, trigger: &str) -> Result<()> {
        for fan_index in self.known_fans() {
            let controller = self.controller(fan_index)?;
            let entity = self.options.read(|opts| opts.resolve(fan_index).temp_entity);
            if entity.is_empty() {
                if controller.subscribed_entity().is_some() {
                    controller.clear();
                }
            } else if controller.subscribed_entity().as_deref() != Some(entity.as_str()) {
                controller.subscribe_temp_entity(&entity);
            }
            if let Err(e) = controller.apply(trigger).await {
                warn!(
                    "OpenFAN {} fan[{}] temp-control apply failed (trig={}): {}",
                    self.host(),
                    fan_index,
                    trigger,
                    e
                );
            }
        }
        Ok(())
    }

    pub async fn apply_temp_control(&self, fan_index: u8, trigger: &str) -> Result<ApplyOutcome> {
        self.controller(fan_index)?.apply(trigger).await
    }

    /// Apply every existing controller; failures are logged, not returned
    pub async fn apply_all(&self, trigger: &str) -> Vec<(u8, ApplyOutcome)> {
        let controllers: Vec<Arc<FanTempController>> =
            self.controllers.lock().values().cloned().collect();
        let mut outcomes = Vec::with_capacity(controllers.len());
        for controller in controllers {
            match controller.apply(trigger).await {
                Ok(outcome) => outcomes.push((controller.fan_index(), outcome)),
                Err(e) => warn!(
                    "OpenFAN {} fan[{}] temp-control apply failed (trig={}): {}",
                    self.host(),
                    controller.fan_index(),
                    trigger,
                    e
                ),
            }
        }
        outcomes
    }

    pub fn controller_state(&self, fan_index: u8) -> Result<FanControllerState> {
        Ok(self.controller(fan_index)?.state())
    }

    pub fn controller_states(&self) -> Vec<FanControllerState> {
        self.controllers
            .lock()
            .values()
            .map(|controller| controller.state())
            .collect()
    }

    /// Change a fan's temperature control settings
    pub async fn set_temp_control(&self, fan_index: u8, update: TempControlUpdate) -> Result<()> {
        validate_fan_index(fan_index)?;
        let curve = match update.temp_curve.as_deref() {
            Some(text) => {
                let curve = Curve::parse(text);
                if curve.is_empty() && !text.trim().is_empty() {
                    return Err(OpenFanError::invalid_config(
                        "temp_curve",
                        format!("no valid points in {text:?}"),
                    ));
                }
                Some(curve)
            }
            None => None,
        };
        let entity = update.temp_entity.as_deref().map(|e| e.trim().to_string());

        self.options.update(|opts| {
            let fan = opts.fan_mut(fan_index);
            if let Some(entity) = &entity {
                fan.temp_entity = Some(entity.clone());
            }
            if let Some(curve) = curve {
                fan.temp_curve = Some(curve);
                fan.profile = None;
            }
            if let Some(secs) = update.temp_integrate_seconds {
                fan.temp_integrate_seconds = Some(secs);
            }
            if let Some(secs) = update.temp_update_min_interval {
                fan.temp_update_min_interval = Some(secs);
            }
            if let Some(pct) = update.temp_deadband_pct {
                fan.temp_deadband_pct = Some(pct);
            }
            Ok(())
        })?;

        if let Some(entity) = entity {
            let controller = self.controller(fan_index)?;
            controller.subscribe_temp_entity(&entity);
            controller.apply("set_temp_control").await?;
        }
        Ok(())
    }

    /// Turn temperature control off for a fan and forget its history
    pub fn clear_temp_control(&self, fan_index: u8) -> Result<()> {
        validate_fan_index(fan_index)?;
        self.options.update(|opts| {
            let fan = opts.fan_mut(fan_index);
            fan.temp_entity = Some(String::new());
            fan.profile = None;
            Ok(())
        })?;
        if let Some(controller) = self.controllers.lock().get(&fan_index) {
            controller.clear();
        }
        info!("OpenFAN {} fan[{}] temperature control cleared", self.host(), fan_index);
        Ok(())
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    pub async fn apply_profile(&self, fan_index: u8, name: &str) -> Result<ApplyOutcome> {
        validate_fan_index(fan_index)?;
        let name = name.trim();
        if self.options.read(|opts| opts.lookup_profile(name)).is_none() {
            return Err(OpenFanError::UnknownProfile(name.to_string()));
        }
        self.options.update(|opts| {
            opts.fan_mut(fan_index).profile = Some(name.to_string());
            Ok(())
        })?;
        let outcome = self.apply_temp_control(fan_index, "profile_applied").await?;
        info!("Applied profile '{}' to fan {}", name, fan_index);
        Ok(outcome)
    }

    /// Store a fan's current curve and timing under a new profile name
    pub fn save_profile(&self, fan_index: u8, name: &str) -> Result<()> {
        validate_fan_index(fan_index)?;
        let name = validate_profile_name(name)?.to_string();
        if BuiltinProfile::is_builtin(&name) {
            return Err(OpenFanError::BuiltinProfile(name));
        }
        self.options.update(|opts| {
            let profile = opts.profile_from_fan(fan_index);
            opts.profiles.insert(name.clone(), profile);
            Ok(())
        })?;
        info!("Saved profile '{}' from fan {} settings", name, fan_index);
        Ok(())
    }

    pub fn list_profiles(&self) -> ProfileList {
        self.options.read(|opts| opts.profile_list())
    }

    // ========================================================================
    // Manual control
    // ========================================================================

    /// Write a PWM; non-zero values are floored to the fan's minimum
    ///
    /// Returns the value written.
    pub async fn set_pwm(&self, fan_index: u8, percent: u8) -> Result<u8> {
        validate_fan_index(fan_index)?;
        let min_pwm = self.options.read(|opts| opts.resolve(fan_index).min_pwm);
        let value = if percent == 0 {
            0
        } else {
            percent.max(min_pwm).min(limits::PWM_MAX)
        };
        self.client.set_pwm_index(fan_index, value).await?;
        self.refresh_after_write().await;
        Ok(value)
    }

    /// Turn a fan on, by default at its minimum (at least 1%)
    pub async fn turn_on(&self, fan_index: u8, percent: Option<u8>) -> Result<u8> {
        validate_fan_index(fan_index)?;
        let percent = match percent {
            Some(p) => p,
            None => self
                .options
                .read(|opts| opts.resolve(fan_index).min_pwm)
                .max(1),
        };
        self.set_pwm(fan_index, percent).await
    }

    pub async fn turn_off(&self, fan_index: u8) -> Result<u8> {
        self.set_pwm(fan_index, 0).await
    }

    pub async fn set_pwm_all(&self, percent: u8) -> Result<()> {
        self.client.set_pwm_all(percent).await?;
        self.refresh_after_write().await;
        Ok(())
    }

    pub async fn set_rpm(&self, fan_index: u8, rpm: u32) -> Result<()> {
        validate_fan_index(fan_index)?;
        self.client.set_rpm_index(fan_index, rpm).await?;
        self.refresh_after_write().await;
        Ok(())
    }

    pub async fn set_led(&self, enabled: bool) -> Result<()> {
        self.client.led_set(enabled).await?;
        self.refresh_after_write().await;
        Ok(())
    }

    pub async fn set_voltage_12v(&self, enabled: bool) -> Result<()> {
        self.client.set_voltage_12v(enabled).await?;
        self.refresh_after_write().await;
        Ok(())
    }

    /// 12 selects the 12V supply; anything else selects 5V
    pub async fn set_voltage(&self, volts: u8) -> Result<()> {
        self.set_voltage_12v(volts == 12).await
    }

    async fn refresh_after_write(&self) {
        if let Err(e) = self.coordinator.refresh().await {
            debug!("OpenFAN {}: refresh after write failed: {}", self.host(), e);
        }
    }

    // ========================================================================
    // Calibration
    // ========================================================================

    /// Find the lowest PWM at which a fan spins reliably
    ///
    /// Steps the PWM from `from_pct` to `to_pct`, waiting one poll interval
    /// per step. The first step reaching `rpm_threshold` plus `margin` is
    /// stored as the fan's calibrated minimum. Returns `None` and leaves
    /// options alone when no step reaches the threshold. Temperature control
    /// of the fan is suspended for the duration.
    pub async fn calibrate_min(
        &self,
        fan_index: u8,
        request: CalibrationRequest,
    ) -> Result<Option<u8>> {
        validate_fan_index(fan_index)?;
        request.validate()?;

        let controller = self.controller(fan_index)?;
        let _guard = controller.begin_calibration().await?;
        let settle = Duration::from_secs(
            self.options
                .read(|opts| opts.poll_interval)
                .max(timing::MIN_CALIBRATION_SETTLE_SECS),
        );
        info!(
            "OpenFAN {} fan[{}] calibrating: {}-{}% step {} (threshold {} RPM)",
            self.host(),
            fan_index,
            request.from_pct,
            request.to_pct,
            request.step,
            request.rpm_threshold
        );

        let mut found = None;
        for pct in request.steps() {
            self.client.set_pwm_index(fan_index, pct).await?;
            tokio::time::sleep(settle).await;
            if let Err(e) = self.coordinator.refresh().await {
                debug!("OpenFAN {}: calibration refresh failed: {}", self.host(), e);
            }
            let rpm = self
                .coordinator
                .snapshot()
                .map(|snapshot| snapshot.rpm(fan_index))
                .unwrap_or(0);
            debug!(
                "OpenFAN {} fan[{}] calibration step {}% -> {} RPM",
                self.host(),
                fan_index,
                pct,
                rpm
            );
            if rpm >= request.rpm_threshold {
                found = Some(pct);
                break;
            }
        }

        let Some(found) = found else {
            warn!(
                "OpenFAN {} fan[{}] calibration did not reach {} RPM; leaving min_pwm unchanged",
                self.host(),
                fan_index,
                request.rpm_threshold
            );
            return Ok(None);
        };

        let min_pwm = found.saturating_add(request.margin).min(limits::PWM_MAX);
        self.options.update(|opts| {
            let fan = opts.fan_mut(fan_index);
            fan.min_pwm = Some(min_pwm);
            fan.min_pwm_calibrated = Some(true);
            Ok(())
        })?;
        info!(
            "OpenFAN {} fan[{}] calibrated min_pwm={}",
            self.host(),
            fan_index,
            min_pwm
        );
        Ok(Some(min_pwm))
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn diagnostics(&self) -> Diagnostics {
        let options = self.options.get();
        let profiles = options.profile_list();
        Diagnostics {
            device: self.device_info(),
            options,
            snapshot: self.snapshot().map(|s| (*s).clone()),
            availability: self.availability(),
            fault: self.coordinator.fault_state(),
            controllers: self.controller_states(),
            profiles,
        }
    }
}

/// Serializable summary of a device, for `status`-style output
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device: DeviceInfo,
    pub availability: Availability,
    pub snapshot: Option<DeviceSnapshot>,
}

impl OpenFanDevice {
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device: self.device_info(),
            availability: self.availability(),
            snapshot: self.snapshot().map(|s| (*s).clone()),
        }
    }
}
