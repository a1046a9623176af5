//! Per-fan temperature controller
//!
//! Each fan has one controller that turns averaged temperature into a PWM
//! target and writes it through an injected [`PwmWriter`].
//!
//! # Gating
//!
//! The controller is active only when the fan's minimum PWM is calibrated
//! and non-zero, a temperature source is configured and the resolved curve
//! has points. Gating is recomputed on every `apply`, so option changes
//! take effect on the next call without a reset.
//!
//! # Hysteresis
//!
//! A new target is written only when it differs from the last written value
//! by at least the deadband and the minimum update interval has passed
//! since the last write. Held targets still update the bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::limits;
use crate::data::{EffectiveSettings, OptionsStore};
use crate::engine::window::SampleWindow;
use crate::error::{OpenFanError, Result};
use crate::temp::TempHub;

/// Sink for PWM decisions
#[async_trait]
pub trait PwmWriter: Send + Sync {
    async fn write_pwm(&self, fan_index: u8, percent: u8) -> Result<()>;
}

/// Introspection record of one fan's controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanControllerState {
    pub fan_index: u8,
    pub active: bool,
    pub temp_entity: String,
    pub temp_curve: String,
    /// Applied profile, `None` for a custom curve
    pub profile: Option<String>,
    pub temp_integrate_seconds: u64,
    pub temp_update_min_interval: u64,
    pub temp_deadband_pct: u8,
    pub min_pwm: u8,
    pub min_pwm_calibrated: bool,
    pub temp_avg: Option<f64>,
    pub last_target_pwm: Option<u8>,
    pub last_applied_pwm: Option<u8>,
    #[serde(skip)]
    pub last_apply_at: Option<Instant>,
}

impl FanControllerState {
    fn new(fan_index: u8) -> Self {
        Self {
            fan_index,
            active: false,
            temp_entity: String::new(),
            temp_curve: String::new(),
            profile: None,
            temp_integrate_seconds: 0,
            temp_update_min_interval: 0,
            temp_deadband_pct: 0,
            min_pwm: 0,
            min_pwm_calibrated: false,
            temp_avg: None,
            last_target_pwm: None,
            last_applied_pwm: None,
            last_apply_at: None,
        }
    }

    fn record_settings(&mut self, settings: &EffectiveSettings) {
        self.temp_entity = settings.temp_entity.clone();
        self.temp_curve = settings.curve.to_string();
        self.profile = settings.profile.clone();
        self.temp_integrate_seconds = settings.integrate_seconds;
        self.temp_update_min_interval = settings.min_update_interval;
        self.temp_deadband_pct = settings.deadband_pct;
        self.min_pwm = settings.min_pwm;
        self.min_pwm_calibrated = settings.min_pwm_calibrated;
    }
}

/// Why a computed target was not written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    Deadband,
    MinInterval,
}

/// Result of one `apply` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Gate not met; nothing to do
    Inactive,
    /// Calibration owns the fan right now
    Suspended,
    /// Active, but no temperature sample available
    NoSample,
    Held { target: u8, reason: HoldReason },
    Applied { target: u8 },
}

/// Clamp a curve target against the fan's minimum
///
/// Zero stays zero so a curve can turn the fan off.
pub fn clamp_target(raw: u8, min_pwm: u8) -> u8 {
    let target = if raw == 0 { 0 } else { raw.max(min_pwm) };
    target.min(limits::PWM_MAX)
}

struct ControllerInner {
    window: SampleWindow,
    state: FanControllerState,
}

/// Temperature controller for a single fan
pub struct FanTempController {
    fan_index: u8,
    host: String,
    options: Arc<OptionsStore>,
    temps: Arc<TempHub>,
    writer: Arc<dyn PwmWriter>,
    inner: Mutex<ControllerInner>,
    /// Serializes apply calls so two decisions never interleave
    apply_lock: tokio::sync::Mutex<()>,
    calibrating: AtomicBool,
    subscription: Mutex<Option<(String, JoinHandle<()>)>>,
}

/// Exclusive claim on a fan's PWM while calibration runs
///
/// Temperature control for the fan is suspended until the guard drops.
pub struct CalibrationGuard {
    controller: Arc<FanTempController>,
}

impl Drop for CalibrationGuard {
    fn drop(&mut self) {
        self.controller.calibrating.store(false, Ordering::Release);
        debug!(
            "OpenFAN {} fan[{}] calibration guard released",
            self.controller.host, self.controller.fan_index
        );
    }
}

impl FanTempController {
    pub fn new(
        fan_index: u8,
        host: impl Into<String>,
        options: Arc<OptionsStore>,
        temps: Arc<TempHub>,
        writer: Arc<dyn PwmWriter>,
    ) -> Self {
        Self {
            fan_index,
            host: host.into(),
            options,
            temps,
            writer,
            inner: Mutex::new(ControllerInner {
                window: SampleWindow::new(),
                state: FanControllerState::new(fan_index),
            }),
            apply_lock: tokio::sync::Mutex::new(()),
            calibrating: AtomicBool::new(false),
            subscription: Mutex::new(None),
        }
    }

    pub fn fan_index(&self) -> u8 {
        self.fan_index
    }

    pub fn state(&self) -> FanControllerState {
        self.inner.lock().state.clone()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::Acquire)
    }

    /// Record a temperature sample at `at`
    pub fn record_sample(&self, at: Instant, value: f64) {
        self.inner.lock().window.push(at, value);
    }

    /// Re-evaluate gating and, if active, compute and maybe write a target
    ///
    /// `trigger` names the cause for logging (`startup`, `periodic`,
    /// `state_change`, ...). Only a failed PWM write is an error.
    pub async fn apply(&self, trigger: &str) -> Result<ApplyOutcome> {
        let _serial = self.apply_lock.lock().await;

        if self.is_calibrating() {
            debug!(
                "OpenFAN {} fan[{}] temp-control suspended during calibration (trig={})",
                self.host, self.fan_index, trigger
            );
            return Ok(ApplyOutcome::Suspended);
        }

        let settings = self.options.read(|opts| opts.resolve(self.fan_index));
        let now = Instant::now();

        let (target, temp) = {
            let mut inner = self.inner.lock();
            inner.state.record_settings(&settings);

            let calibrated = settings.min_pwm_calibrated && settings.min_pwm > 0;
            let has_entity = !settings.temp_entity.is_empty();
            if !(calibrated && has_entity && !settings.curve.is_empty()) {
                if inner.state.active {
                    info!(
                        "OpenFAN {} fan[{}] temperature control inactive",
                        self.host, self.fan_index
                    );
                }
                inner.state.active = false;
                debug!(
                    "OpenFAN {} fan[{}] temp-control gated (cal={}, temp_entity={}, pts={}, trig={})",
                    self.host,
                    self.fan_index,
                    calibrated,
                    has_entity,
                    settings.curve.len(),
                    trigger
                );
                return Ok(ApplyOutcome::Inactive);
            }

            if !inner.state.active {
                info!(
                    "OpenFAN {} fan[{}] temperature control active (entity={}, profile={})",
                    self.host,
                    self.fan_index,
                    settings.temp_entity,
                    settings.profile.as_deref().unwrap_or("custom")
                );
            }
            inner.state.active = true;

            let mut temp = inner.window.average(now, settings.integrate_seconds);
            if temp.is_none() {
                if let Some(value) = self.temps.current(&settings.temp_entity) {
                    inner.window.push(now, value);
                    temp = inner.window.average(now, settings.integrate_seconds);
                }
            }
            let Some(temp) = temp else {
                debug!(
                    "OpenFAN {} fan[{}] temp-control: no temp sample yet (trigger={})",
                    self.host, self.fan_index, trigger
                );
                return Ok(ApplyOutcome::NoSample);
            };

            // Active curve is non-empty, so evaluation always yields a value
            let raw = settings.curve.evaluate(temp).unwrap_or(0);
            let target = clamp_target(raw, settings.min_pwm);

            let hold = match (inner.state.last_applied_pwm, inner.state.last_apply_at) {
                (Some(last), _) if target.abs_diff(last) < settings.deadband_pct => {
                    Some(HoldReason::Deadband)
                }
                (_, Some(at))
                    if now.saturating_duration_since(at)
                        < Duration::from_secs(
                            settings
                                .min_update_interval
                                .max(limits::MIN_UPDATE_INTERVAL_SECS),
                        ) =>
                {
                    Some(HoldReason::MinInterval)
                }
                _ => None,
            };

            if let Some(reason) = hold {
                inner.state.temp_avg = Some(temp);
                inner.state.last_target_pwm = Some(target);
                return Ok(ApplyOutcome::Held { target, reason });
            }
            (target, temp)
        };

        self.writer.write_pwm(self.fan_index, target).await?;

        let mut inner = self.inner.lock();
        inner.state.temp_avg = Some(temp);
        inner.state.last_target_pwm = Some(target);
        inner.state.last_applied_pwm = Some(target);
        inner.state.last_apply_at = Some(now);
        debug!(
            "OpenFAN {} fan[{}] temp-control APPLY: temp={:.1}°C target={}% (min={}%, profile={}, trig={})",
            self.host,
            self.fan_index,
            temp,
            target,
            settings.min_pwm,
            settings.profile.as_deref().unwrap_or("custom"),
            trigger
        );
        Ok(ApplyOutcome::Applied { target })
    }

    /// Follow a temperature entity, replacing any previous subscription
    ///
    /// Each numeric reading is recorded and triggers an `apply` on its own
    /// task. Unavailable readings are ignored. An empty entity id only
    /// unsubscribes.
    pub fn subscribe_temp_entity(self: &Arc<Self>, entity: &str) {
        self.unsubscribe();
        let entity = entity.trim();
        if entity.is_empty() {
            return;
        }

        let mut rx = self.temps.subscribe(entity);
        let weak: Weak<Self> = Arc::downgrade(self);
        let entity_id = entity.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let reading = match rx.recv().await {
                    Ok(reading) => reading,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("temp subscription {} lagged by {}", entity_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(value) = reading.value() else {
                    continue;
                };
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.record_sample(Instant::now(), value);
                tokio::spawn(async move {
                    if let Err(e) = controller.apply("state_change").await {
                        warn!(
                            "OpenFAN {} fan[{}] temp-control write failed: {}",
                            controller.host, controller.fan_index, e
                        );
                    }
                });
            }
        });

        *self.subscription.lock() = Some((entity.to_string(), handle));
        debug!(
            "OpenFAN {} fan[{}] subscribed to {}",
            self.host, self.fan_index, entity
        );
    }

    /// Entity currently subscribed to
    pub fn subscribed_entity(&self) -> Option<String> {
        self.subscription
            .lock()
            .as_ref()
            .map(|(entity, _)| entity.clone())
    }

    pub fn unsubscribe(&self) {
        if let Some((entity, handle)) = self.subscription.lock().take() {
            handle.abort();
            debug!(
                "OpenFAN {} fan[{}] unsubscribed from {}",
                self.host, self.fan_index, entity
            );
        }
    }

    /// Drop the subscription, samples and all decision history
    pub fn clear(&self) {
        self.unsubscribe();
        let mut inner = self.inner.lock();
        inner.window.clear();
        inner.state.active = false;
        inner.state.temp_avg = None;
        inner.state.last_target_pwm = None;
        inner.state.last_applied_pwm = None;
        inner.state.last_apply_at = None;
    }

    /// Claim the fan for calibration
    ///
    /// Fails if a calibration already holds the fan. Waits for an in-flight
    /// apply to finish so no temperature write lands after the claim.
    pub async fn begin_calibration(self: &Arc<Self>) -> Result<CalibrationGuard> {
        if self
            .calibrating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(OpenFanError::CalibrationInProgress(self.fan_index));
        }
        let guard = CalibrationGuard {
            controller: Arc::clone(self),
        };
        drop(self.apply_lock.lock().await);
        Ok(guard)
    }
}

impl Drop for FanTempController {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.subscription.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DeviceOptions, FanOptions};
    use crate::engine::Curve;

    /// Writer that records every call
    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(u8, u8)>>,
        fail: AtomicBool,
    }

    impl RecordingWriter {
        fn writes(&self) -> Vec<(u8, u8)> {
            self.writes.lock().clone()
        }
    }

    #[async_trait]
    impl PwmWriter for RecordingWriter {
        async fn write_pwm(&self, fan_index: u8, percent: u8) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(OpenFanError::generic("write failed"));
            }
            self.writes.lock().push((fan_index, percent));
            Ok(())
        }
    }

    fn calibrated_options(deadband: u8, interval: u64) -> DeviceOptions {
        let mut options = DeviceOptions::default();
        *options.fan_mut(0) = FanOptions {
            min_pwm: Some(20),
            min_pwm_calibrated: Some(true),
            temp_entity: Some("sensor.cpu".into()),
            temp_curve: Some(Curve::parse("45=25,65=55,70=100")),
            temp_deadband_pct: Some(deadband),
            temp_update_min_interval: Some(interval),
            ..Default::default()
        };
        options
    }

    fn controller(
        options: DeviceOptions,
    ) -> (Arc<FanTempController>, Arc<RecordingWriter>, Arc<TempHub>) {
        let store = Arc::new(OptionsStore::in_memory(options).unwrap());
        let hub = Arc::new(TempHub::new());
        let writer = Arc::new(RecordingWriter::default());
        let ctrl = Arc::new(FanTempController::new(
            0,
            "http://fan.test",
            store,
            hub.clone(),
            writer.clone(),
        ));
        (ctrl, writer, hub)
    }

    #[test]
    fn test_clamp_target() {
        assert_eq!(clamp_target(0, 20), 0);
        assert_eq!(clamp_target(10, 20), 20);
        assert_eq!(clamp_target(32, 20), 32);
        assert_eq!(clamp_target(120, 20), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncalibrated_is_inactive() {
        let mut options = calibrated_options(3, 10);
        options.fan_mut(0).min_pwm_calibrated = Some(false);
        let (ctrl, writer, hub) = controller(options);
        hub.publish_state("sensor.cpu", "50");

        assert_eq!(ctrl.apply("test").await.unwrap(), ApplyOutcome::Inactive);
        assert!(!ctrl.state().active);
        assert!(writer.writes().is_empty());
        // Settings are still recorded for introspection
        assert_eq!(ctrl.state().min_pwm, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_min_pwm_is_inactive() {
        let mut options = calibrated_options(3, 10);
        options.fan_mut(0).min_pwm = Some(0);
        let (ctrl, _, _) = controller(options);
        assert_eq!(ctrl.apply("test").await.unwrap(), ApplyOutcome::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_curve_is_inactive() {
        let mut options = calibrated_options(3, 10);
        options.temp_curve = Curve::default();
        options.fan_mut(0).temp_curve = None;
        let (ctrl, _, _) = controller(options);
        assert_eq!(ctrl.apply("test").await.unwrap(), ApplyOutcome::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sample() {
        let (ctrl, writer, _) = controller(calibrated_options(3, 10));
        assert_eq!(ctrl.apply("test").await.unwrap(), ApplyOutcome::NoSample);
        assert!(ctrl.state().active);
        assert!(writer.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_from_current_value() {
        let (ctrl, writer, hub) = controller(calibrated_options(3, 10));
        hub.publish_state("sensor.cpu", "50");

        assert_eq!(
            ctrl.apply("startup").await.unwrap(),
            ApplyOutcome::Applied { target: 32 }
        );
        assert_eq!(writer.writes(), vec![(0, 32)]);
        let state = ctrl.state();
        assert_eq!(state.temp_avg, Some(50.0));
        assert_eq!(state.last_applied_pwm, Some(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_floored_to_min_pwm() {
        let mut options = calibrated_options(3, 10);
        options.fan_mut(0).min_pwm = Some(40);
        let (ctrl, writer, _) = controller(options);
        ctrl.record_sample(Instant::now(), 30.0);

        ctrl.apply("test").await.unwrap();
        assert_eq!(writer.writes(), vec![(0, 40)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadband_boundary() {
        let (ctrl, writer, _) = controller(calibrated_options(3, 2));
        // 45 -> 25
        ctrl.record_sample(Instant::now(), 45.0);
        ctrl.apply("test").await.unwrap();
        assert_eq!(writer.writes(), vec![(0, 25)]);

        // 46.3°C -> target 27, within deadband 3 of 25
        tokio::time::advance(Duration::from_secs(40)).await;
        ctrl.record_sample(Instant::now(), 46.3);
        let outcome = ctrl.apply("test").await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Held {
                target: 27,
                reason: HoldReason::Deadband
            }
        );
        assert_eq!(ctrl.state().last_target_pwm, Some(27));

        // 47 -> 25 + 30 * 0.1 = 28, exactly deadband away
        tokio::time::advance(Duration::from_secs(40)).await;
        ctrl.record_sample(Instant::now(), 47.0);
        assert_eq!(
            ctrl.apply("test").await.unwrap(),
            ApplyOutcome::Applied { target: 28 }
        );
        assert_eq!(writer.writes(), vec![(0, 25), (0, 28)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_holds() {
        let (ctrl, writer, _) = controller(calibrated_options(0, 10));
        ctrl.record_sample(Instant::now(), 45.0);
        ctrl.apply("test").await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        ctrl.clear();
        ctrl.record_sample(Instant::now(), 65.0);
        // clear() reset history, so this writes immediately
        assert_eq!(
            ctrl.apply("test").await.unwrap(),
            ApplyOutcome::Applied { target: 55 }
        );

        tokio::time::advance(Duration::from_secs(9)).await;
        ctrl.record_sample(Instant::now(), 70.0);
        ctrl.record_sample(Instant::now(), 70.0);
        assert!(matches!(
            ctrl.apply("test").await.unwrap(),
            ApplyOutcome::Held {
                reason: HoldReason::MinInterval,
                ..
            }
        ));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(
            ctrl.apply("test").await.unwrap(),
            ApplyOutcome::Applied { .. }
        ));
        assert_eq!(writer.writes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_keeps_history() {
        let (ctrl, writer, _) = controller(calibrated_options(3, 10));
        writer.fail.store(true, Ordering::Relaxed);
        ctrl.record_sample(Instant::now(), 50.0);

        assert!(ctrl.apply("test").await.is_err());
        assert_eq!(ctrl.state().last_applied_pwm, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_state() {
        let (ctrl, _, hub) = controller(calibrated_options(3, 10));
        hub.publish_state("sensor.cpu", "50");
        ctrl.subscribe_temp_entity("sensor.cpu");
        ctrl.apply("test").await.unwrap();

        ctrl.clear();
        let state = ctrl.state();
        assert!(!state.active);
        assert_eq!(state.temp_avg, None);
        assert_eq!(state.last_applied_pwm, None);
        assert_eq!(state.last_apply_at, None);
        assert_eq!(ctrl.subscribed_entity(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_triggers_apply() {
        let (ctrl, writer, hub) = controller(calibrated_options(3, 10));
        ctrl.subscribe_temp_entity("sensor.cpu");
        assert_eq!(ctrl.subscribed_entity().as_deref(), Some("sensor.cpu"));

        hub.publish_state("sensor.cpu", "unavailable");
        hub.publish_state("sensor.cpu", "65");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(writer.writes(), vec![(0, 55)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_replaces_previous() {
        let (ctrl, writer, hub) = controller(calibrated_options(3, 10));
        ctrl.subscribe_temp_entity("sensor.old");
        ctrl.subscribe_temp_entity("sensor.cpu");

        hub.publish_state("sensor.old", "65");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(writer.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_suspends_apply() {
        let (ctrl, writer, _) = controller(calibrated_options(3, 10));
        ctrl.record_sample(Instant::now(), 50.0);

        let guard = ctrl.begin_calibration().await.unwrap();
        assert!(matches!(
            ctrl.begin_calibration().await,
            Err(OpenFanError::CalibrationInProgress(0))
        ));
        assert_eq!(ctrl.apply("periodic").await.unwrap(), ApplyOutcome::Suspended);
        assert!(writer.writes().is_empty());

        drop(guard);
        assert!(!ctrl.is_calibrating());
        assert!(matches!(
            ctrl.apply("periodic").await.unwrap(),
            ApplyOutcome::Applied { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_switch_takes_effect_without_reset() {
        let (ctrl, writer, _) = controller(calibrated_options(0, 2));
        ctrl.record_sample(Instant::now(), 60.0);
        ctrl.apply("test").await.unwrap();

        ctrl.options
            .update(|opts| {
                opts.fan_mut(0).profile = Some("aggressive".into());
                Ok(())
            })
            .unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        ctrl.record_sample(Instant::now(), 60.0);
        ctrl.apply("profile_applied").await.unwrap();

        let state = ctrl.state();
        assert_eq!(state.profile.as_deref(), Some("aggressive"));
        // aggressive: 55=70, 65=100 -> 85 at 60°C
        assert_eq!(writer.writes().last(), Some(&(0, 85)));
    }
}
