// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for dashguard.

/// Mask a sensitive string (like a session id) for logging.
///
/// Shows only the first `visible_prefix` characters and replaces the rest with "...".
/// Input no longer than the prefix is masked entirely.
///
/// # Examples
///
/// ```
/// use dashguard::utils::mask_sensitive;
///
/// let session_id = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
/// assert_eq!(mask_sensitive(session_id, 8), "9f86d081...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix {
        return "...".to_string();
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Mask an email-like identifier for log output: first character of the
/// local part, then the domain.
///
/// ```
/// use dashguard::utils::mask_identifier;
///
/// assert_eq!(mask_identifier("user@example.com"), "u***@example.com");
/// assert_eq!(mask_identifier("alice"), "a***");
/// ```
pub fn mask_identifier(identifier: &str) -> String {
    let first: String = identifier.chars().take(1).collect();
    match identifier.split_once('@') {
        Some((_, domain)) => format!("{}***@{}", first, domain),
        None => format!("{}***", first),
    }
}

/// Whole minutes remaining, rounded up, for lockout messages.
pub fn ceil_minutes(remaining_ms: i64) -> i64 {
    if remaining_ms <= 0 {
        return 0;
    }
    (remaining_ms + 59_999) / 60_000
}
