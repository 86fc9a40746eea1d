// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Retry with exponential backoff for the authentication call.
//!
//! Credential failures (401/403) are surfaced on the first occurrence:
//! retrying them would only burn through the caller's lockout budget.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use crate::error::AuthError;

/// Errors that know whether another try could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AuthError {
    fn is_retryable(&self) -> bool {
        !self.is_auth_failure()
    }
}

/// Backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single try, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before try number `attempt + 1` (1-based `attempt`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. `op` receives the 1-based try number.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::warn!("RETRY_EXHAUSTED | attempts={} error={}", attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    "RETRY | attempt={} delay_ms={} error={}",
                    attempt,
                    delay.as_millis(),
                    e
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_auth_failures_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), AuthError> = with_retry(&instant_policy(5), |_| {
            calls += 1;
            Err(AuthError::Http { status: 401 })
        });
        assert_eq!(result, Err(AuthError::Http { status: 401 }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_transient_errors_retry_until_success() {
        let result = with_retry(&instant_policy(3), |attempt| {
            if attempt < 3 {
                Err(AuthError::Unavailable("503".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), AuthError> = with_retry(&instant_policy(2), |_| {
            calls += 1;
            Err(AuthError::Http { status: 500 })
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
