//! Background loops for one device
//!
//! - Poll loop: refreshes the coordinator every `poll_interval` seconds.
//! - Periodic apply: re-applies temperature control for all fans every
//!   `max(5, temp_update_min_interval)` seconds, on top of the
//!   event-driven applies from the temperature feed.
//!
//! - Config watch: adopts option changes other `openfand` commands write
//!   to the config file (profiles, calibration results).
//!
//! All re-read their interval each round so option changes take effect
//! without a restart, and all stop when the shutdown channel flips.

use std::sync::Arc;
use std::time::Duration;

use of_core::OpenFanDevice;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConfigWatcher, DaemonConfig};

/// How often the config file is checked for outside edits
pub const CONFIG_WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive poll failures are reported by the coordinator itself; this
/// loop only keeps the cadence.
pub async fn run_poll_loop(device: Arc<OpenFanDevice>, mut shutdown: watch::Receiver<bool>) {
    info!("Poll loop starting for {}", device.host());
    loop {
        tokio::select! {
            _ = tokio::time::sleep(device.poll_interval()) => {}
            _ = shutdown.changed() => break,
        }
        if let Err(e) = device.refresh_now().await {
            debug!("Poll of {} failed: {}", device.host(), e);
        }
    }
    info!("Poll loop stopped for {}", device.host());
}

pub async fn run_periodic_apply(device: Arc<OpenFanDevice>, mut shutdown: watch::Receiver<bool>) {
    info!("Periodic temperature apply starting for {}", device.host());
    loop {
        tokio::select! {
            _ = tokio::time::sleep(device.periodic_apply_interval()) => {}
            _ = shutdown.changed() => break,
        }
        let outcomes = device.apply_all("periodic").await;
        debug!("Periodic apply for {}: {:?}", device.host(), outcomes);
    }
    info!("Periodic temperature apply stopped for {}", device.host());
}

pub async fn run_config_watch(
    device: Arc<OpenFanDevice>,
    mut watcher: ConfigWatcher,
    running: DaemonConfig,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Watching {:?} for configuration changes", watcher.path());
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        let config = match watcher.check() {
            Ok(Some(config)) => config,
            Ok(None) => continue,
            Err(e) => {
                warn!("ACTION: Config reload failed: {} - continuing with existing config", e);
                continue;
            }
        };
        info!("SIGNAL: Configuration change detected in {:?}", watcher.path());
        if config.restart_fields_differ(&running) {
            warn!("Host, fan count or temperature source changes apply after a restart");
        }
        match device.reload_options(config.options).await {
            Ok(true) => info!("ACTION: Configuration reloaded successfully"),
            Ok(false) => debug!("Options already current"),
            Err(e) => {
                warn!("ACTION: Config reload failed: {} - continuing with existing config", e)
            }
        }
    }
    info!("Config watch stopped");
}
