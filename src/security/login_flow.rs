// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Login and session-gate orchestration.
//!
//! The login form calls [`LoginFlow::attempt`]: lockout check first, then
//! the auth call, then either failure bookkeeping or attempt reset plus
//! session creation. Route guards call [`LoginFlow::gate`].

use serde::Serialize;
use serde_json::json;

use crate::audit::EventKind;
use crate::error::AuthError;
use crate::retry::{with_retry, RetryPolicy};
use crate::utils::ceil_minutes;

use super::context::SecurityContext;
use super::login_attempts::{AttemptOutcome, LockoutStatus};
use super::session_manager::Session;

/// Identity returned by a successful auth call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
}

/// What the login form should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LoginResult {
    SignedIn(Session),
    Rejected {
        message: String,
        /// Shown once few attempts remain
        warning: Option<String>,
        attempts_remaining: u32,
    },
    LockedOut {
        message: String,
        remaining_ms: i64,
    },
}

/// What a route guard should do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum SessionGate {
    Active(Session),
    Refreshed(Session),
    /// No valid session; send the user to the login entry point
    RedirectToLogin,
}

/// User-facing lockout message, minutes rounded up.
pub fn lockout_message(remaining_ms: i64) -> String {
    let minutes = ceil_minutes(remaining_ms).max(1);
    format!(
        "Too many failed attempts. Please try again in {} minute{}.",
        minutes,
        if minutes == 1 { "" } else { "s" }
    )
}

/// Drives a login attempt against a [`SecurityContext`].
pub struct LoginFlow<'a> {
    ctx: &'a SecurityContext,
    retry: RetryPolicy,
}

impl<'a> LoginFlow<'a> {
    pub fn new(ctx: &'a SecurityContext) -> Self {
        Self {
            ctx,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attempt a login for `identifier`.
    ///
    /// `auth` is retried on transient errors per the retry policy. A
    /// credential rejection counts as a failed attempt; any other error is
    /// returned unchanged and does not count.
    pub fn attempt<F>(&self, identifier: &str, mut auth: F) -> Result<LoginResult, AuthError>
    where
        F: FnMut() -> Result<AuthenticatedUser, AuthError>,
    {
        let tracker = self.ctx.attempts();

        if let LockoutStatus::Locked { remaining_ms, .. } = tracker.is_locked_out(identifier) {
            self.ctx.events().log(
                EventKind::LoginBlocked,
                json!({
                    "identifier": tracker.hash_identifier(identifier),
                    "remainingMs": remaining_ms,
                }),
            );
            return Ok(LoginResult::LockedOut {
                message: lockout_message(remaining_ms),
                remaining_ms,
            });
        }

        match with_retry(&self.retry, |_| auth()) {
            Ok(user) => {
                tracker.clear_attempts(identifier);
                let session = self.ctx.sessions().create_session(&user.user_id, &user.email);
                self.ctx
                    .events()
                    .log(EventKind::LoginSucceeded, json!({ "userId": user.user_id }));
                Ok(LoginResult::SignedIn(session))
            }
            Err(e) if e.is_auth_failure() => Ok(self.rejected(identifier)),
            Err(e) => Err(e),
        }
    }

    fn rejected(&self, identifier: &str) -> LoginResult {
        match self.ctx.attempts().record_failed_attempt(identifier) {
            AttemptOutcome::Locked { lockout_until, .. } => {
                let remaining_ms = lockout_until.saturating_sub(self.ctx.clock().now_ms());
                LoginResult::LockedOut {
                    message: lockout_message(remaining_ms),
                    remaining_ms,
                }
            }
            AttemptOutcome::Allowed {
                attempts_remaining, ..
            } => {
                let warn_at = self.ctx.config().lockout.warn_at_remaining;
                let warning = (attempts_remaining <= warn_at).then(|| {
                    format!(
                        "{} attempt{} remaining before your account is temporarily locked.",
                        attempts_remaining,
                        if attempts_remaining == 1 { "" } else { "s" }
                    )
                });
                LoginResult::Rejected {
                    message: "Invalid email or password.".to_string(),
                    warning,
                    attempts_remaining,
                }
            }
        }
    }

    /// Decide whether a protected view may render.
    pub fn gate(&self) -> SessionGate {
        let sessions = self.ctx.sessions();
        if sessions.needs_refresh() {
            if let Some(session) = sessions.refresh_session() {
                return SessionGate::Refreshed(session);
            }
        }
        match sessions.get_session() {
            Some(session) => SessionGate::Active(session),
            None => SessionGate::RedirectToLogin,
        }
    }
}
