// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session Manager
//!
//! Manages the single signed-in session record and its validity.
//!
//! ## Validity
//!
//! A session is valid iff all three hold at check time:
//!
//! - **Absolute expiry**: `now <= expiresAt` (24h after creation or last refresh)
//! - **Inactivity**: `now - lastActivity <= inactivityTimeout` (30 min), where
//!   `lastActivity` is the stamp persisted in the long-lived store
//! - **Device binding**: the session's `deviceId` equals the current device id
//!
//! Expiry is evaluated lazily by [`SessionPolicy::validate`], a pure function
//! of the stored state and `now`; no timer is involved.
//!
//! ## Storage
//!
//! The session lives in the short-lived store. Device id and last activity
//! live in the long-lived store. An invalid or unreadable session record is
//! deleted when it is read.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::audit::{EventKind, SecurityEventLogger};
use crate::clock::{format_millis, Clock};
use crate::config::SessionConfig;
use crate::error::StorageError;
use crate::storage::{keys, read_json, write_json, KeyValueStore};
use crate::token::TokenSource;
use crate::utils::{mask_identifier, mask_sensitive};

/// Visible prefix of session ids in log output.
const SESSION_ID_LOG_PREFIX: usize = 8;

/// One authenticated session. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub user_email: String,
    pub device_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_activity: i64,
}

/// Why a session failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// `now > expiresAt`
    Expired,
    /// No interaction within the inactivity timeout
    Inactive,
    /// Session was minted on another device
    DeviceMismatch,
}

impl InvalidReason {
    pub fn event_kind(&self) -> EventKind {
        match self {
            InvalidReason::Expired => EventKind::SessionExpired,
            InvalidReason::Inactive => EventKind::SessionInactive,
            InvalidReason::DeviceMismatch => EventKind::SessionDeviceMismatch,
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::Expired => write!(f, "EXPIRED"),
            InvalidReason::Inactive => write!(f, "INACTIVE"),
            InvalidReason::DeviceMismatch => write!(f, "DEVICE_MISMATCH"),
        }
    }
}

/// Pure validity rules over `(stored state, now)`.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    config: SessionConfig,
}

impl SessionPolicy {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check the three-part invariant.
    ///
    /// `last_activity` is the persisted stamp; when absent the session's own
    /// `last_activity` is used. `current_device` of `None` means no device id
    /// has been registered, which never matches.
    pub fn validate(
        &self,
        session: &Session,
        last_activity: Option<i64>,
        current_device: Option<&str>,
        now: i64,
    ) -> Result<(), InvalidReason> {
        if now > session.expires_at {
            return Err(InvalidReason::Expired);
        }

        let last = last_activity.unwrap_or(session.last_activity);
        // An idle time too large to represent is as inactive as it gets
        match now.checked_sub(last) {
            Some(idle) if idle <= self.config.inactivity_timeout_ms => {}
            _ => return Err(InvalidReason::Inactive),
        }

        let device_matches = current_device
            .map(|current| bool::from(session.device_id.as_bytes().ct_eq(current.as_bytes())))
            .unwrap_or(false);
        if !device_matches {
            return Err(InvalidReason::DeviceMismatch);
        }

        Ok(())
    }

    /// True when less than the refresh threshold remains before expiry.
    pub fn needs_refresh(&self, session: &Session, now: i64) -> bool {
        session.expires_at.saturating_sub(now) < self.config.refresh_threshold_ms
    }
}

/// Coarse session status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session record
    None,
    /// Valid and not yet due for refresh
    Active,
    /// Valid but inside the refresh threshold
    RefreshDue,
    /// Present but failing validation
    Invalid(InvalidReason),
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::None => write!(f, "NONE"),
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::RefreshDue => write!(f, "REFRESH_DUE"),
            SessionStatus::Invalid(reason) => write!(f, "INVALID ({})", reason),
        }
    }
}

/// Read-only projection of the session for UI display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub valid: bool,
    pub status: SessionStatus,
    /// Milliseconds until absolute expiry (0 when invalid or absent).
    pub remaining_ms: i64,
    pub user_email: Option<String>,
    pub created_at: Option<String>,
    pub expires_at: Option<String>,
    pub last_activity: Option<String>,
}

/// Manages the active session record.
pub struct SessionManager {
    /// Short-lived store holding the session record
    session_store: Arc<dyn KeyValueStore>,
    /// Long-lived store holding device id and last activity
    persistent: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenSource>,
    events: Arc<SecurityEventLogger>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(
        session_store: Arc<dyn KeyValueStore>,
        persistent: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenSource>,
        events: Arc<SecurityEventLogger>,
        config: SessionConfig,
    ) -> Self {
        Self {
            session_store,
            persistent,
            clock,
            tokens,
            events,
            policy: SessionPolicy::new(config),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    // ------------------------------------------------------------------
    // Device id
    // ------------------------------------------------------------------

    /// The persisted device id, without generating one.
    fn stored_device_id(&self) -> Option<String> {
        match self.persistent.get(keys::DEVICE_ID) {
            Ok(Some(id)) if !id.trim().is_empty() => Some(id),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("DEVICE_ID_UNREADABLE | error={}", e);
                None
            }
        }
    }

    /// Return the existing device id or generate and persist a new one.
    pub fn init_device_id(&self) -> String {
        if let Some(id) = self.stored_device_id() {
            return id;
        }

        let id = self.tokens.generate();
        match self.persistent.set(keys::DEVICE_ID, &id) {
            Ok(()) => {
                self.events.log(
                    EventKind::DeviceRegistered,
                    json!({ "deviceId": mask_sensitive(&id, SESSION_ID_LOG_PREFIX) }),
                );
            }
            Err(e) => {
                tracing::warn!("DEVICE_ID_PERSIST_FAILED | error={}", e);
            }
        }
        id
    }

    /// The current device id, initializing it if absent.
    pub fn device_id(&self) -> String {
        self.init_device_id()
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Create and persist a new session, superseding any existing one.
    pub fn create_session(&self, user_id: &str, user_email: &str) -> Session {
        let now = self.clock.now_ms();
        let session = Session {
            id: self.tokens.generate(),
            user_id: user_id.to_string(),
            user_email: user_email.to_string(),
            device_id: self.device_id(),
            created_at: now,
            expires_at: now.saturating_add(self.policy.config.max_age_ms),
            last_activity: now,
        };

        if let Err(e) = write_json(self.session_store.as_ref(), keys::SESSION, &session) {
            tracing::error!(
                "SESSION_PERSIST_FAILED | session={} error={}",
                mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
                e
            );
        }
        self.stamp_last_activity(now);

        tracing::info!(
            "SESSION_CREATED | session={} user={} email={}",
            mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
            session.user_id,
            mask_identifier(&session.user_email)
        );
        self.events.log(
            EventKind::SessionCreated,
            json!({
                "userId": session.user_id,
                "sessionId": mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
                "expiresAt": session.expires_at,
            }),
        );

        session
    }

    /// Read the raw session record without validating it.
    fn read_session(&self) -> Result<Option<Session>, StorageError> {
        read_json(self.session_store.as_ref(), keys::SESSION)
    }

    /// The persisted last-activity stamp. Unparsable values count as absent.
    fn last_activity(&self) -> Option<i64> {
        match self.persistent.get(keys::LAST_ACTIVITY) {
            Ok(Some(raw)) => raw.trim().parse().ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("LAST_ACTIVITY_UNREADABLE | error={}", e);
                None
            }
        }
    }

    fn check(&self, session: &Session) -> Result<(), InvalidReason> {
        self.policy.validate(
            session,
            self.last_activity(),
            self.stored_device_id().as_deref(),
            self.clock.now_ms(),
        )
    }

    /// The current session if present, readable and valid.
    ///
    /// Invalid or corrupt records are removed as a side effect.
    pub fn get_session(&self) -> Option<Session> {
        let session = match self.read_session() {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(StorageError::Malformed { source, .. }) => {
                tracing::warn!("SESSION_CORRUPTED | error={} | clearing record", source);
                self.events
                    .log(EventKind::SessionCorrupted, json!({ "error": source.to_string() }));
                self.remove_records();
                return None;
            }
            Err(e) => {
                tracing::warn!("SESSION_UNREADABLE | error={}", e);
                return None;
            }
        };

        match self.check(&session) {
            Ok(()) => Some(session),
            Err(reason) => {
                tracing::info!(
                    "SESSION_INVALID | session={} reason={}",
                    mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
                    reason
                );
                self.events.log(
                    reason.event_kind(),
                    json!({
                        "userId": session.user_id,
                        "sessionId": mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
                    }),
                );
                self.remove_records();
                None
            }
        }
    }

    /// Predicate form of the validity invariant. `None` is never valid.
    pub fn is_session_valid(&self, session: Option<&Session>) -> bool {
        session.map(|s| self.check(s).is_ok()).unwrap_or(false)
    }

    /// True iff a valid session exists and expires within the refresh threshold.
    pub fn needs_refresh(&self) -> bool {
        self.get_session()
            .map(|session| self.policy.needs_refresh(&session, self.clock.now_ms()))
            .unwrap_or(false)
    }

    /// Extend the current session to `now + maxAge`. `None` when there is no
    /// valid session, in which case nothing is written.
    pub fn refresh_session(&self) -> Option<Session> {
        let mut session = self.get_session()?;
        let now = self.clock.now_ms();
        session.expires_at = now.saturating_add(self.policy.config.max_age_ms);
        session.last_activity = now;

        if let Err(e) = write_json(self.session_store.as_ref(), keys::SESSION, &session) {
            tracing::error!(
                "SESSION_PERSIST_FAILED | session={} error={}",
                mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
                e
            );
        }
        self.stamp_last_activity(now);

        tracing::debug!(
            "SESSION_REFRESHED | session={} expires_at={}",
            mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
            format_millis(session.expires_at)
        );
        self.events.log(
            EventKind::SessionRefreshed,
            json!({
                "sessionId": mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
                "expiresAt": session.expires_at,
            }),
        );

        Some(session)
    }

    /// Record a user interaction. Wiring this to input events is the
    /// caller's job.
    pub fn update_last_activity(&self) {
        self.stamp_last_activity(self.clock.now_ms());
    }

    fn stamp_last_activity(&self, now: i64) {
        if let Err(e) = self.persistent.set(keys::LAST_ACTIVITY, &now.to_string()) {
            tracing::warn!("LAST_ACTIVITY_PERSIST_FAILED | error={}", e);
        }
    }

    fn remove_records(&self) {
        if let Err(e) = self.session_store.remove(keys::SESSION) {
            tracing::warn!("SESSION_CLEAR_FAILED | key={} error={}", keys::SESSION, e);
        }
        if let Err(e) = self.persistent.remove(keys::LAST_ACTIVITY) {
            tracing::warn!("SESSION_CLEAR_FAILED | key={} error={}", keys::LAST_ACTIVITY, e);
        }
    }

    /// Remove the session and last-activity entries (logout).
    pub fn clear_session(&self) {
        let existing = self.read_session().ok().flatten();
        self.remove_records();
        if let Some(session) = existing {
            tracing::info!(
                "SESSION_CLEARED | session={}",
                mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX)
            );
            self.events.log(
                EventKind::SessionCleared,
                json!({
                    "userId": session.user_id,
                    "sessionId": mask_sensitive(&session.id, SESSION_ID_LOG_PREFIX),
                }),
            );
        }
    }

    /// Display projection of the stored session. Performs no writes.
    pub fn session_info(&self) -> SessionInfo {
        let session = match self.read_session() {
            Ok(Some(session)) => session,
            _ => {
                return SessionInfo {
                    valid: false,
                    status: SessionStatus::None,
                    remaining_ms: 0,
                    user_email: None,
                    created_at: None,
                    expires_at: None,
                    last_activity: None,
                }
            }
        };

        let now = self.clock.now_ms();
        let last_activity = self.last_activity().unwrap_or(session.last_activity);
        let status = match self.check(&session) {
            Ok(()) if self.policy.needs_refresh(&session, now) => SessionStatus::RefreshDue,
            Ok(()) => SessionStatus::Active,
            Err(reason) => SessionStatus::Invalid(reason),
        };
        let valid = !matches!(status, SessionStatus::Invalid(_));

        SessionInfo {
            valid,
            status,
            remaining_ms: if valid { session.expires_at.saturating_sub(now).max(0) } else { 0 },
            user_email: Some(session.user_email),
            created_at: Some(format_millis(session.created_at)),
            expires_at: Some(format_millis(session.expires_at)),
            last_activity: Some(format_millis(last_activity)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
