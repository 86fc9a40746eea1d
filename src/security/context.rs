// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wiring for the security components.
//!
//! A [`SecurityContext`] owns one set of stores, a clock and a token source,
//! and builds the session manager, attempt tracker and event logger over
//! them. Tests create as many isolated contexts as they like.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::audit::{EventContext, EventKind, SecurityEvent, SecurityEventLogger};
use crate::clock::{Clock, SystemClock};
use crate::config::SecurityConfig;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::token::{OsTokenSource, TokenSource};
use crate::utils::mask_sensitive;

use super::login_attempts::{LockoutStatus, LoginAttemptTracker};
use super::session_manager::{SessionInfo, SessionManager};

/// File name of the long-lived store inside the data directory.
pub const LONG_LIVED_STORE_FILE: &str = "store.json";

/// Look-back window for the failed-login count in [`SecurityStatus`].
const STATUS_LOOKBACK_MS: i64 = 24 * 60 * 60 * 1000;

/// Aggregated view consumed by the UI's security panel.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityStatus {
    pub session: SessionInfo,
    /// Masked device id, if one has been registered
    pub device: Option<String>,
    /// Lockout state of the identifier asked about, if any
    pub lockout: Option<LockoutStatus>,
    pub active_lockouts: usize,
    pub failed_logins_24h: usize,
    pub last_event: Option<SecurityEvent>,
}

/// One isolated set of security components.
pub struct SecurityContext {
    config: SecurityConfig,
    persistent: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: Arc<SecurityEventLogger>,
    sessions: SessionManager,
    attempts: LoginAttemptTracker,
}

impl SecurityContext {
    pub fn new(
        config: SecurityConfig,
        session_store: Arc<dyn KeyValueStore>,
        persistent: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenSource>,
        caller: EventContext,
    ) -> Self {
        let config = config.validated();
        let events = Arc::new(SecurityEventLogger::new(
            persistent.clone(),
            clock.clone(),
            caller,
            config.events.clone(),
        ));
        let sessions = SessionManager::new(
            session_store,
            persistent.clone(),
            clock.clone(),
            tokens,
            events.clone(),
            config.session.clone(),
        );
        let attempts = LoginAttemptTracker::new(
            persistent.clone(),
            clock.clone(),
            events.clone(),
            config.lockout.clone(),
        );

        Self {
            config,
            persistent,
            clock,
            events,
            sessions,
            attempts,
        }
    }

    /// Production wiring: in-process short-lived store, file-backed
    /// long-lived store under the configured data directory.
    pub fn open(config: SecurityConfig) -> Result<Self> {
        let long_lived = FileStore::open(config.data_dir().join(LONG_LIVED_STORE_FILE))?;
        Ok(Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(long_lived),
            Arc::new(SystemClock),
            Arc::new(OsTokenSource),
            EventContext::detect(),
        ))
    }

    /// Like [`open`](Self::open) but with the short-lived store persisted at
    /// `session_file`, for hosts where one "tab" spans several processes.
    pub fn open_with_session_file(config: SecurityConfig, session_file: &Path) -> Result<Self> {
        let long_lived = FileStore::open(config.data_dir().join(LONG_LIVED_STORE_FILE))?;
        let short_lived = FileStore::open(session_file)?;
        Ok(Self::new(
            config,
            Arc::new(short_lived),
            Arc::new(long_lived),
            Arc::new(SystemClock),
            Arc::new(OsTokenSource),
            EventContext::detect(),
        ))
    }

    /// Fully in-memory context with the given clock.
    pub fn in_memory(config: SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            clock,
            Arc::new(OsTokenSource),
            EventContext::new("dashguard-test", "app://localhost/"),
        )
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn attempts(&self) -> &LoginAttemptTracker {
        &self.attempts
    }

    pub fn events(&self) -> &SecurityEventLogger {
        &self.events
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Aggregate session, lockout and event state for display.
    ///
    /// Never writes: a missing device id is reported as `None` rather than
    /// generated.
    pub fn security_status(&self, identifier: Option<&str>) -> SecurityStatus {
        let now = self.clock.now_ms();
        let device = self
            .persistent
            .get(crate::storage::keys::DEVICE_ID)
            .ok()
            .flatten()
            .map(|id| mask_sensitive(&id, 8));

        SecurityStatus {
            session: self.sessions.session_info(),
            device,
            lockout: identifier.map(|id| self.attempts.is_locked_out(id)),
            active_lockouts: self.attempts.active_lockout_count(),
            failed_logins_24h: self
                .events
                .count_since(EventKind::LoginFailed.as_str(), now.saturating_sub(STATUS_LOOKBACK_MS))
                + self
                    .events
                    .count_since(
                        EventKind::AccountLocked.as_str(),
                        now.saturating_sub(STATUS_LOOKBACK_MS),
                    ),
            last_event: self.events.recent_events(1).into_iter().next(),
        }
    }
}
