// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for dashguard.
//!
//! Only the storage port and the auth collaborator surface errors. The
//! session, lockout and event components absorb them and fall back to
//! safe defaults, so nothing here is expected to reach a UI caller.

use thiserror::Error;

/// Failure of a key-value store operation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage quota exceeded for key {0}")]
    QuotaExceeded(String),

    #[error("malformed value under key {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reported by the authentication collaborator.
///
/// `Unauthorized` and `Forbidden` mirror HTTP 401/403 and are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    Unauthorized,

    #[error("access forbidden")]
    Forbidden,

    #[error("authentication service unavailable: {0}")]
    Unavailable(String),

    #[error("authentication request failed with status {status}")]
    Http { status: u16 },
}

impl AuthError {
    /// True for errors that mean "your credentials are wrong", as opposed to
    /// transport or service faults.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            AuthError::Unauthorized | AuthError::Forbidden => true,
            AuthError::Http { status } => matches!(status, 401 | 403),
            AuthError::Unavailable(_) => false,
        }
    }
}
