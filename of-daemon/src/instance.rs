//! One running daemon per config file
//!
//! `run` records its pid next to the config file. One-shot commands that
//! would fight the running control loop check for it first.

use std::fs;
use std::path::{Path, PathBuf};

use of_error::{OpenFanError, Result};
use tracing::{debug, warn};

/// Pid file belonging to a config file
pub fn pid_file_for(config_path: &Path) -> PathBuf {
    config_path.with_extension("pid")
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Pid of another live daemon using this pid file
///
/// Stale files left by a crashed daemon are ignored.
pub fn running_instance(pid_file: &Path) -> Option<u32> {
    let pid: u32 = fs::read_to_string(pid_file).ok()?.trim().parse().ok()?;
    (pid != std::process::id() && process_alive(pid)).then_some(pid)
}

/// Held by `run` for its lifetime; removes the pid file on drop
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(pid_file: &Path) -> Result<Self> {
        if let Some(pid) = running_instance(pid_file) {
            return Err(OpenFanError::AlreadyRunning(pid));
        }
        fs::write(pid_file, format!("{}\n", std::process::id())).map_err(|e| {
            OpenFanError::FileWrite {
                path: pid_file.to_path_buf(),
                source: e,
            }
        })?;
        debug!("Wrote pid file {:?}", pid_file);
        Ok(Self {
            path: pid_file.to_path_buf(),
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove pid file {:?}: {}", self.path, e);
        }
    }
}
