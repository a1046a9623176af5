//! Temperature feed from hwmon files
//!
//! Reads each configured `temp*_input` file and publishes the value to the
//! [`TempHub`] under its entity id. Like a host state machine, a reading is
//! published only when it differs from the previous one.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use of_core::{TempHub, TempReading};
use of_error::{OpenFanError, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const MILLIDEGREE_DIVISOR: f64 = 1000.0;

/// Read one hwmon temperature file
///
/// Unreadable files are errors; content that is not an integer is an
/// unavailable reading.
pub fn read_hwmon_temp(path: &Path) -> Result<TempReading> {
    let content = fs::read_to_string(path).map_err(|e| OpenFanError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(match content.trim().parse::<i64>() {
        Ok(millidegrees) => TempReading::Celsius(millidegrees as f64 / MILLIDEGREE_DIVISOR),
        Err(_) => TempReading::Unavailable,
    })
}

pub struct TempFeed {
    hub: Arc<TempHub>,
    sources: BTreeMap<String, PathBuf>,
    last: HashMap<String, TempReading>,
}

impl TempFeed {
    pub fn new(hub: Arc<TempHub>, sources: BTreeMap<String, PathBuf>) -> Self {
        Self {
            hub,
            sources,
            last: HashMap::new(),
        }
    }

    /// Read every source once; returns how many readings changed
    pub fn poll(&mut self) -> usize {
        let mut changed = 0;
        for (entity, path) in &self.sources {
            let reading = match read_hwmon_temp(path) {
                Ok(reading) => reading,
                Err(e) => {
                    if self.last.get(entity) != Some(&TempReading::Unavailable) {
                        warn!("Temperature source {} unreadable: {}", entity, e);
                    }
                    TempReading::Unavailable
                }
            };
            if self.last.get(entity) == Some(&reading) {
                continue;
            }
            debug!("Temperature {} -> {:?}", entity, reading);
            self.hub.publish(entity, reading);
            self.last.insert(entity.clone(), reading);
            changed += 1;
        }
        changed
    }
}

/// Poll the feed until shutdown
pub async fn run_temp_feed(
    mut feed: TempFeed,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if feed.sources.is_empty() {
        debug!("No temperature sources configured; feed idle");
        return;
    }
    info!("Temperature feed starting ({} source(s))", feed.sources.len());
    loop {
        feed.poll();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("Temperature feed stopped");
}
