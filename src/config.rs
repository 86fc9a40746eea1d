// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration for the session, lockout and event-log components.
//!
//! Loaded from `~/.dashguard/config.json`. Every field has a default, so an
//! absent or partial file is fine. Values that would break the temporal
//! rules (zero windows, a refresh threshold longer than the session) are
//! clamped with a warning rather than rejected.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

/// Absolute session lifetime: 24 hours.
pub const DEFAULT_MAX_AGE_MS: i64 = 24 * HOUR_MS;
/// Refresh once less than this remains: 30 minutes.
pub const DEFAULT_REFRESH_THRESHOLD_MS: i64 = 30 * MINUTE_MS;
/// Inactivity timeout: 30 minutes.
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: i64 = 30 * MINUTE_MS;
/// Failures within the window that trigger a lockout.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Lockout length: 15 minutes.
pub const DEFAULT_LOCKOUT_DURATION_MS: i64 = 15 * MINUTE_MS;
/// Sliding attempt window: 15 minutes.
pub const DEFAULT_ATTEMPT_WINDOW_MS: i64 = 15 * MINUTE_MS;
/// Longest accepted duration for any timeout, window or lifetime: 365 days.
pub const MAX_DURATION_MS: i64 = 365 * 24 * HOUR_MS;
/// Security events kept in the log.
pub const DEFAULT_MAX_EVENTS: usize = 100;

/// Name of the data directory under the user's home.
pub const DATA_DIR_NAME: &str = ".dashguard";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_age_ms: i64,
    pub refresh_threshold_ms: i64,
    pub inactivity_timeout_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_ms: DEFAULT_MAX_AGE_MS,
            refresh_threshold_ms: DEFAULT_REFRESH_THRESHOLD_MS,
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub lockout_duration_ms: i64,
    pub attempt_window_ms: i64,
    /// Remaining-attempt count at or below which the login form warns.
    pub warn_at_remaining: u32,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration_ms: DEFAULT_LOCKOUT_DURATION_MS,
            attempt_window_ms: DEFAULT_ATTEMPT_WINDOW_MS,
            warn_at_remaining: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub max_events: usize,
    /// Mirror every stored event to `tracing`.
    pub mirror_to_tracing: bool,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            mirror_to_tracing: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub session: SessionConfig,
    pub lockout: LockoutConfig,
    pub events: EventLogConfig,
    /// Overrides the data directory (defaults to `~/.dashguard`).
    pub data_dir: Option<PathBuf>,
}

/// Non-positive durations fall back to `default`; anything past
/// [`MAX_DURATION_MS`] is capped so `now + duration` cannot overflow.
fn clamp_duration(name: &str, value: i64, default: i64) -> i64 {
    if value <= 0 {
        tracing::warn!("CONFIG | {}={} is not positive, using {}", name, value, default);
        default
    } else if value > MAX_DURATION_MS {
        tracing::warn!("CONFIG | {}={} too large, capped to {}", name, value, MAX_DURATION_MS);
        MAX_DURATION_MS
    } else {
        value
    }
}

impl SecurityConfig {
    /// Clamp values that would make the temporal rules meaningless.
    pub fn validated(mut self) -> Self {
        let defaults = SessionConfig::default();
        self.session.max_age_ms = clamp_duration(
            "session.max_age_ms",
            self.session.max_age_ms,
            defaults.max_age_ms,
        );
        self.session.inactivity_timeout_ms = clamp_duration(
            "session.inactivity_timeout_ms",
            self.session.inactivity_timeout_ms,
            defaults.inactivity_timeout_ms,
        );
        if self.session.refresh_threshold_ms < 0
            || self.session.refresh_threshold_ms >= self.session.max_age_ms
        {
            let clamped = self.session.max_age_ms / 2;
            tracing::warn!(
                "CONFIG | session.refresh_threshold_ms={} outside [0, max_age), clamped to {}",
                self.session.refresh_threshold_ms,
                clamped
            );
            self.session.refresh_threshold_ms = clamped;
        }

        let lockout_defaults = LockoutConfig::default();
        if self.lockout.max_attempts == 0 {
            tracing::warn!("CONFIG | lockout.max_attempts=0 would lock on sight, using 1");
            self.lockout.max_attempts = 1;
        }
        self.lockout.lockout_duration_ms = clamp_duration(
            "lockout.lockout_duration_ms",
            self.lockout.lockout_duration_ms,
            lockout_defaults.lockout_duration_ms,
        );
        self.lockout.attempt_window_ms = clamp_duration(
            "lockout.attempt_window_ms",
            self.lockout.attempt_window_ms,
            lockout_defaults.attempt_window_ms,
        );

        if self.events.max_events == 0 {
            tracing::warn!("CONFIG | events.max_events=0, using {}", DEFAULT_MAX_EVENTS);
            self.events.max_events = DEFAULT_MAX_EVENTS;
        }
        self
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// `~/.dashguard`, or `./.dashguard` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

/// Load configuration from a JSON file, falling back to defaults when the
/// file does not exist.
pub fn load_config(path: &Path) -> Result<SecurityConfig> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?
    } else {
        SecurityConfig::default()
    };
    Ok(config.validated())
}

pub fn save_config(path: &Path, config: &SecurityConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}
