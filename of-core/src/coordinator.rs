//! Polling coordinator
//!
//! Polls a device through [`DeviceClient`], publishes immutable snapshots,
//! tracks consecutive failures and runs per-fan stall detection.
//!
//! # Availability
//!
//! - **Healthy**: the last poll succeeded.
//! - **Degraded**: recent polls failed, fewer than `failure_threshold` in a
//!   row. The previous snapshot stays visible.
//! - **ForcedUnavailable**: `failure_threshold` or more failures in a row.
//!   One successful poll returns to Healthy.
//!
//! # Stall detection
//!
//! A fan is stalled-now when its last written PWM is above its minimum and
//! it reports 0 RPM. After `stall_consecutive` such polls in a row the fan
//! is flagged and a single [`StallEvent`] is raised. The event re-arms
//! once the flag clears.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::api::DeviceClient;
use crate::data::{
    Availability, BoardStatus, DeviceSnapshot, FanRuntimeStatus, FaultState, OptionsStore,
    StallEvent,
};
use crate::error::{OpenFanError, Result};

/// Receiver of stall rising edges
#[cfg_attr(test, mockall::automock)]
pub trait StallNotifier: Send + Sync {
    fn stall_detected(&self, event: &StallEvent);
}

/// Notifier that writes a warning to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStallNotifier;

impl StallNotifier for LogStallNotifier {
    fn stall_detected(&self, event: &StallEvent) {
        warn!(event = event.kind(), fan = event.fan_index, "SIGNAL: {}", event.message());
    }
}

/// Outcome of the most recent completed poll, shared with coalesced waiters
#[derive(Default)]
struct PollRecord {
    seq: u64,
    outcome: Option<std::result::Result<Arc<DeviceSnapshot>, String>>,
}

/// Polls one device and owns its snapshot and fault state
pub struct PollingCoordinator {
    client: Arc<DeviceClient>,
    options: Arc<OptionsStore>,
    notifier: Arc<dyn StallNotifier>,
    snapshot: RwLock<Option<Arc<DeviceSnapshot>>>,
    fault: Mutex<FaultState>,
    last_update_success: AtomicBool,
    /// At most one poll in flight; holds the last outcome
    poll_gate: tokio::sync::Mutex<PollRecord>,
    polls_started: AtomicU64,
}

impl PollingCoordinator {
    pub fn new(
        client: Arc<DeviceClient>,
        options: Arc<OptionsStore>,
        notifier: Arc<dyn StallNotifier>,
    ) -> Self {
        Self {
            client,
            options,
            notifier,
            snapshot: RwLock::new(None),
            fault: Mutex::new(FaultState::default()),
            last_update_success: AtomicBool::new(false),
            poll_gate: tokio::sync::Mutex::new(PollRecord::default()),
            polls_started: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &Arc<DeviceClient> {
        &self.client
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Option<Arc<DeviceSnapshot>> {
        self.snapshot.read().clone()
    }

    pub fn fault_state(&self) -> FaultState {
        self.fault.lock().clone()
    }

    pub fn availability(&self) -> Availability {
        self.fault.lock().availability()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::Acquire)
    }

    /// Last poll succeeded and the device is not forced unavailable
    pub fn is_available(&self) -> bool {
        self.last_update_success() && !self.fault.lock().forced_unavailable
    }

    /// Poll now, sharing the result with overlapping callers
    ///
    /// A caller that arrives while a poll is in flight waits for it and
    /// then runs its own poll, unless another poll that started after the
    /// caller's request has already completed, in which case that result
    /// is returned.
    pub async fn refresh(&self) -> Result<Arc<DeviceSnapshot>> {
        let requested_after = self.polls_started.load(Ordering::Acquire);
        let mut gate = self.poll_gate.lock().await;

        if gate.seq > requested_after {
            if let Some(outcome) = gate.outcome.clone() {
                debug!("OpenFAN {}: refresh coalesced into poll #{}", self.client.host(), gate.seq);
                return outcome.map_err(OpenFanError::UpdateFailed);
            }
        }

        let seq = self.polls_started.fetch_add(1, Ordering::AcqRel) + 1;
        let result = self.poll_once().await;
        gate.seq = seq;
        gate.outcome = Some(match &result {
            Ok(snapshot) => Ok(Arc::clone(snapshot)),
            Err(e) => Err(update_failed_message(e)),
        });
        result
    }

    async fn poll_once(&self) -> Result<Arc<DeviceSnapshot>> {
        let rpms = match self.client.get_status_all().await {
            Ok(rpms) => rpms,
            Err(e) => {
                self.record_failure(&e);
                return Err(OpenFanError::UpdateFailed(update_failed_message(&e)));
            }
        };

        self.record_success();

        let board = match self.client.get_openfan_status().await {
            Ok(board) => board,
            Err(e) => {
                debug!("OpenFAN {}: openfan/status fetch failed: {}", self.client.host(), e);
                BoardStatus::default()
            }
        };

        let snapshot = Arc::new(self.classify(&rpms, board));
        *self.snapshot.write() = Some(Arc::clone(&snapshot));
        debug!("OpenFAN {} update OK: {:?}", self.client.host(), snapshot);
        Ok(snapshot)
    }

    fn record_success(&self) {
        let mut fault = self.fault.lock();
        if fault.consecutive_failures > 0 {
            info!(
                "OpenFAN {} recovered after {} failed poll(s)",
                self.client.host(),
                fault.consecutive_failures
            );
        }
        fault.consecutive_failures = 0;
        fault.forced_unavailable = false;
        fault.last_error = None;
        drop(fault);
        self.last_update_success.store(true, Ordering::Release);
    }

    fn record_failure(&self, err: &OpenFanError) {
        let threshold = self.options.read(|opts| opts.failure_threshold);
        let mut fault = self.fault.lock();
        fault.consecutive_failures += 1;
        fault.last_error = Some(err.to_string());
        let failures = fault.consecutive_failures;

        if failures >= threshold && !fault.forced_unavailable {
            fault.forced_unavailable = true;
            error!(
                "OpenFAN {} unavailable after {} consecutive failures: {}",
                self.client.host(),
                failures,
                err
            );
        } else if failures == 1 {
            warn!("OpenFAN {} update failed: {}", self.client.host(), err);
        } else {
            debug!(
                "OpenFAN {} update failed ({} in a row): {}",
                self.client.host(),
                failures,
                err
            );
        }
        drop(fault);
        self.last_update_success.store(false, Ordering::Release);
    }

    /// Build a snapshot and advance per-fan stall counters
    fn classify(&self, rpms: &BTreeMap<u8, u32>, board: BoardStatus) -> DeviceSnapshot {
        let (need, min_pwms): (u32, BTreeMap<u8, u8>) = self.options.read(|opts| {
            (
                opts.stall_consecutive,
                rpms.keys()
                    .map(|idx| (*idx, opts.resolve(*idx).min_pwm))
                    .collect(),
            )
        });

        let mut events = Vec::new();
        let mut fans = BTreeMap::new();
        {
            let mut fault = self.fault.lock();
            for (&index, &rpm) in rpms {
                let pwm = self.client.last_pwm(index);
                let min_pwm = min_pwms.get(&index).copied().unwrap_or(0);
                let stalled_now = pwm > min_pwm && rpm == 0;

                let counter = fault.stall_counters.entry(index).or_insert(0);
                *counter = if stalled_now { *counter + 1 } else { 0 };
                let stalled = *counter >= need;

                let notified = fault.stall_notified.entry(index).or_insert(false);
                if stalled && !*notified {
                    *notified = true;
                    events.push(StallEvent {
                        host: self.client.host().to_string(),
                        fan_index: index,
                        pwm,
                    });
                } else if !stalled {
                    *notified = false;
                }

                fans.insert(index, FanRuntimeStatus { rpm, pwm, stalled });
            }
        }

        // Notify outside the lock so sinks may call back in
        for event in &events {
            self.notifier.stall_detected(event);
        }

        DeviceSnapshot {
            fans,
            led_on: board.led_on,
            is_12v: board.is_12v,
        }
    }
}

fn update_failed_message(err: &OpenFanError) -> String {
    match err {
        OpenFanError::UpdateFailed(msg) => msg.clone(),
        other => format!("Failed to update OpenFAN: {other}"),
    }
}
