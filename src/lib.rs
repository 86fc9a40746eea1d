// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! dashguard - session lifecycle and login lockout for the content dashboard
//!
//! Everything runs against local key-value storage; there are no network
//! calls and no timers. Expiry of sessions, attempt windows and lockouts is
//! computed from stored timestamps whenever state is read.
//!
//! # Core Modules
//!
//! - [`security`] - Session manager, login attempt tracker, login flow
//! - [`audit`] - Bounded security event log
//! - [`storage`] - Key-value storage port with memory and file backends
//! - [`config`] - Timeouts, thresholds and data directory
//! - [`clock`] / [`token`] - Time and random-token sources
//! - [`retry`] - Backoff for the auth call
//! - [`error`] - Storage and auth error types

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod security;
pub mod storage;
pub mod token;
pub mod utils;

pub use audit::{redact_secrets, EventContext, EventKind, SecurityEvent, SecurityEventLogger};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, save_config, SecurityConfig};
pub use error::{AuthError, StorageError};
pub use retry::{with_retry, RetryPolicy};
pub use security::{
    AttemptOutcome, AuthenticatedUser, InvalidReason, LockoutStatus, LoginAttemptTracker,
    LoginFlow, LoginResult, SecurityContext, SecurityStatus, Session, SessionGate, SessionInfo,
    SessionManager, SessionStatus,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use token::{OsTokenSource, TokenSource};
pub use utils::{mask_identifier, mask_sensitive};
