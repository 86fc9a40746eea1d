// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Long-lived store persisted as a single JSON object on disk.
//!
//! Reads take a shared lock and writes an exclusive lock on a sibling
//! `.lock` file. Writes go to a temp file and are renamed into place so a
//! crash never leaves a half-written store behind.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use fs2::FileExt;

use super::KeyValueStore;
use crate::error::StorageError;

/// Default timeout for acquiring file locks (5 seconds)
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

type Entries = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// File-backed [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    /// Open (or prepare to create) a store at `path`, creating parent
    /// directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory: {:?}", parent))?;
        }
        Ok(Self {
            path,
            lock_timeout: LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn acquire(&self, mode: LockMode) -> Result<File, StorageError> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;

        let start = Instant::now();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&lock_file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&lock_file),
            };
            match attempt {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= self.lock_timeout {
                        return Err(StorageError::Unavailable(format!(
                            "timed out after {:?} waiting for {:?} lock on {:?}",
                            self.lock_timeout, mode, self.path
                        )));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
    }

    /// Load all entries. Caller must hold a lock.
    fn load(&self) -> Result<Entries, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };
        if content.trim().is_empty() {
            return Ok(Entries::new());
        }
        serde_json::from_str(&content).map_err(|source| StorageError::Malformed {
            key: self.path.display().to_string(),
            source,
        })
    }

    /// Load for modification. A corrupt file is replaced rather than
    /// blocking every future write.
    fn load_for_write(&self) -> Result<Entries, StorageError> {
        match self.load() {
            Err(StorageError::Malformed { source, .. }) => {
                tracing::warn!(
                    "STORE_CORRUPTED | path={:?} error={} | resetting store",
                    self.path,
                    source
                );
                Ok(Entries::new())
            }
            other => other,
        }
    }

    /// Write all entries atomically. Caller must hold the exclusive lock.
    fn persist(&self, entries: &Entries) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(entries).map_err(|source| {
            StorageError::Encode {
                key: self.path.display().to_string(),
                source,
            }
        })?;

        let temp_path = self.path.with_extension("tmp");
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(content.as_bytes())?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _lock = self.acquire(LockMode::Shared)?;
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _lock = self.acquire(LockMode::Exclusive)?;
        let mut entries = self.load_for_write()?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _lock = self.acquire(LockMode::Exclusive)?;
        let mut entries = self.load_for_write()?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FileStore {
        FileStore::open(dir.path().join("nested").join("store.json")).unwrap()
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.get("anything").unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set("dashguard_device_id", "abc123").unwrap();
        store.set("dashguard_last_activity", "1700000000000").unwrap();

        let reopened = store_in(&dir);
        assert_eq!(
            reopened.get("dashguard_device_id").unwrap().as_deref(),
            Some("abc123")
        );

        reopened.remove("dashguard_device_id").unwrap();
        assert_eq!(store.get("dashguard_device_id").unwrap(), None);
        assert!(store.get("dashguard_last_activity").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_file_fails_reads_and_heals_on_write() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{{{ definitely not json").unwrap();

        assert!(matches!(
            store.get("k"),
            Err(StorageError::Malformed { .. })
        ));

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_exclusive_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).with_lock_timeout(Duration::from_millis(100));

        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(store.lock_path())
            .unwrap();
        FileExt::lock_exclusive(&holder).unwrap();

        let result = store.set("k", "v");
        assert!(matches!(result, Err(StorageError::Unavailable(_))));

        FileExt::unlock(&holder).unwrap();
        store.set("k", "v").unwrap();
    }
}
