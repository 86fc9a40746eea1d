// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security Module
//!
//! Client-side session lifecycle and login lockout.
//!
//! ## Controls
//!
//! - **Absolute session expiry**: 24 hours, extended on refresh
//! - **Inactivity timeout**: 30 minutes without a recorded interaction
//! - **Device binding**: sessions only validate on the device that minted them
//! - **Login lockout**: 5 failures within 15 minutes lock the identifier for 15 minutes
//! - **Audit logging**: every lifecycle change is written to the security event log
//!
//! ## Usage
//!
//! ```no_run
//! use dashguard::config::SecurityConfig;
//! use dashguard::security::SecurityContext;
//!
//! let ctx = SecurityContext::open(SecurityConfig::default()).unwrap();
//!
//! if !ctx.attempts().is_locked_out("user@example.com").is_locked() {
//!     // ... authenticate ...
//!     ctx.attempts().clear_attempts("user@example.com");
//!     let session = ctx.sessions().create_session("user-42", "user@example.com");
//!     assert!(ctx.sessions().is_session_valid(Some(&session)));
//! }
//! ```

pub mod context;
pub mod locks;
pub mod login_attempts;
pub mod login_flow;
pub mod session_manager;

pub use context::{SecurityContext, SecurityStatus, LONG_LIVED_STORE_FILE};
pub use locks::{resilient_read, resilient_write};
pub use login_attempts::{
    hash_identifier, lockout_remaining, prune_window, AttemptOutcome, LockoutStatus,
    LoginAttemptTracker,
};
pub use login_flow::{lockout_message, AuthenticatedUser, LoginFlow, LoginResult, SessionGate};
pub use session_manager::{
    InvalidReason, Session, SessionInfo, SessionManager, SessionPolicy, SessionStatus,
};
