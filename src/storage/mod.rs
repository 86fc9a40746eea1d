// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Key-value storage port.
//!
//! Everything dashguard persists goes through [`KeyValueStore`]. Two
//! lifetimes are used:
//!
//! - **short-lived**: the active session record; gone when the tab/process ends
//!   ([`MemoryStore`]).
//! - **long-lived**: device id, last activity, login attempts, lockouts and
//!   the security event log; survives restarts ([`FileStore`]).
//!
//! Values are strings. Structured values are JSON-encoded with
//! [`read_json`] / [`write_json`].

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// Storage key names, namespaced so they can share an origin with other code.
pub mod keys {
    /// Serialized `Session` (short-lived store).
    pub const SESSION: &str = "dashguard_session";
    /// Stringified epoch millis of the last user interaction.
    pub const LAST_ACTIVITY: &str = "dashguard_last_activity";
    /// Hex device id.
    pub const DEVICE_ID: &str = "dashguard_device_id";
    /// `{hashedIdentifier: [timestamps...]}`
    pub const LOGIN_ATTEMPTS: &str = "dashguard_login_attempts";
    /// `{hashedIdentifier: lockoutUntilMillis}`
    pub const LOCKOUTS: &str = "dashguard_lockouts";
    /// `[{type, timestamp, details}, ...]`, newest first.
    pub const SECURITY_EVENTS: &str = "dashguard_security_events";
}

/// A string-valued key-value store.
///
/// Implementations provide no transactions; concurrent writers race and the
/// last write wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read and decode a JSON value. Missing keys decode to `None`.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Malformed {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it.
pub fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Store whose every operation fails, for exercising fallback paths.
    #[derive(Debug, Default)]
    pub struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("storage disabled".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("storage disabled".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("storage disabled".into()))
        }
    }
}
