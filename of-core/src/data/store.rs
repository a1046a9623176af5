//! In-memory options store with pluggable write-back
//!
//! The store owns the authoritative [`DeviceOptions`]. Every update is
//! validated and handed to an [`OptionsPersister`] before it becomes
//! visible, so a rejected update leaves the previous options in place.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::data::config::DeviceOptions;
use crate::data::validation::validate_options;
use crate::error::{OpenFanError, Result};

/// Host-side storage for options
#[cfg_attr(test, mockall::automock)]
pub trait OptionsPersister: Send + Sync {
    fn persist(&self, options: &DeviceOptions) -> Result<()>;
}

/// Persister that keeps nothing beyond the in-memory copy
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryPersister;

impl OptionsPersister for MemoryPersister {
    fn persist(&self, _options: &DeviceOptions) -> Result<()> {
        Ok(())
    }
}

/// Authoritative options for one device
pub struct OptionsStore {
    current: RwLock<DeviceOptions>,
    /// Serializes writers; readers only wait for the final swap
    writer: Mutex<()>,
    persister: Arc<dyn OptionsPersister>,
}

impl std::fmt::Debug for OptionsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsStore")
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

impl OptionsStore {
    /// Validate and wrap options
    pub fn new(options: DeviceOptions, persister: Arc<dyn OptionsPersister>) -> Result<Self> {
        validate_options(&options)?;
        Ok(Self {
            current: RwLock::new(options),
            writer: Mutex::new(()),
            persister,
        })
    }

    pub fn in_memory(options: DeviceOptions) -> Result<Self> {
        Self::new(options, Arc::new(MemoryPersister))
    }

    /// Copy of the current options
    pub fn get(&self) -> DeviceOptions {
        self.current.read().clone()
    }

    /// Read the current options without cloning
    pub fn read<R>(&self, f: impl FnOnce(&DeviceOptions) -> R) -> R {
        f(&self.current.read())
    }

    /// Apply a change, validate, persist, then publish
    ///
    /// Writers are serialized. Readers keep seeing the previous options
    /// while the persister runs. If `change`, validation or the persister
    /// fails, the stored options are unchanged.
    pub fn update<R>(&self, change: impl FnOnce(&mut DeviceOptions) -> Result<R>) -> Result<R> {
        let _writer = self.writer.lock();
        let mut next = self.get();
        let result = change(&mut next)?;
        validate_options(&next)?;
        self.persister.persist(&next)?;
        *self.current.write() = next;
        Ok(result)
    }

    /// Adopt options changed outside this process
    ///
    /// Validated but not persisted, since they came from storage. Returns
    /// false when nothing changed.
    pub fn replace(&self, options: DeviceOptions) -> Result<bool> {
        validate_options(&options)?;
        let _writer = self.writer.lock();
        let mut current = self.current.write();
        if *current == options {
            return Ok(false);
        }
        *current = options;
        Ok(true)
    }
}

/// Write a value as pretty JSON via a temp file and rename
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| OpenFanError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path).map_err(|e| OpenFanError::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;
    file.write_all(json.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| OpenFanError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| OpenFanError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!("Saved options to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_persists_and_publishes() {
        let mut persister = MockOptionsPersister::new();
        persister
            .expect_persist()
            .withf(|opts| opts.poll_interval == 9)
            .times(1)
            .returning(|_| Ok(()));

        let store = OptionsStore::new(DeviceOptions::default(), Arc::new(persister)).unwrap();
        store
            .update(|opts| {
                opts.poll_interval = 9;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get().poll_interval, 9);
    }

    #[test]
    fn test_invalid_update_is_not_persisted() {
        let mut persister = MockOptionsPersister::new();
        persister.expect_persist().times(0);

        let store = OptionsStore::new(DeviceOptions::default(), Arc::new(persister)).unwrap();
        let result = store.update(|opts| {
            opts.poll_interval = 0;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(store.get().poll_interval, 5);
    }

    #[test]
    fn test_persist_failure_keeps_previous() {
        let mut persister = MockOptionsPersister::new();
        persister
            .expect_persist()
            .returning(|_| Err(OpenFanError::generic("disk full")));

        let store = OptionsStore::new(DeviceOptions::default(), Arc::new(persister)).unwrap();
        let result = store.update(|opts| {
            opts.min_pwm = 10;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(store.get().min_pwm, 0);
    }

    /// Reads the store it belongs to while persisting
    #[derive(Default)]
    struct ReadingPersister {
        store: std::sync::OnceLock<std::sync::Weak<OptionsStore>>,
        seen: Mutex<Vec<u64>>,
    }

    impl OptionsPersister for ReadingPersister {
        fn persist(&self, options: &DeviceOptions) -> Result<()> {
            let store = self.store.get().and_then(|weak| weak.upgrade());
            let published = store.map(|store| store.read(|opts| opts.poll_interval));
            self.seen.lock().push(options.poll_interval);
            self.seen.lock().extend(published);
            Ok(())
        }
    }

    #[test]
    fn test_store_readable_while_persisting() {
        let persister = Arc::new(ReadingPersister::default());
        let store = Arc::new(
            OptionsStore::new(DeviceOptions::default(), persister.clone()).unwrap(),
        );
        persister.store.set(Arc::downgrade(&store)).unwrap();

        store
            .update(|opts| {
                opts.poll_interval = 9;
                Ok(())
            })
            .unwrap();
        // New value handed to storage while readers still saw the old one
        assert_eq!(*persister.seen.lock(), vec![9, 5]);
        assert_eq!(store.get().poll_interval, 9);
    }

    #[test]
    fn test_replace_skips_identical_and_invalid() {
        let mut persister = MockOptionsPersister::new();
        persister.expect_persist().times(0);
        let store = OptionsStore::new(DeviceOptions::default(), Arc::new(persister)).unwrap();

        assert!(!store.replace(DeviceOptions::default()).unwrap());
        let changed = DeviceOptions {
            poll_interval: 7,
            ..Default::default()
        };
        assert!(store.replace(changed).unwrap());
        assert_eq!(store.get().poll_interval, 7);

        let invalid = DeviceOptions {
            poll_interval: 0,
            ..Default::default()
        };
        assert!(store.replace(invalid).is_err());
        assert_eq!(store.get().poll_interval, 7);
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let options = DeviceOptions {
            stall_consecutive: 0,
            ..Default::default()
        };
        assert!(OptionsStore::in_memory(options).is_err());
    }

    #[test]
    fn test_write_json_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("options.json");
        write_json_atomic(&path, &DeviceOptions::default()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: DeviceOptions = serde_json::from_str(&text).unwrap();
        assert_eq!(back, DeviceOptions::default());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
