// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Login attempt tracking and temporary lockout.
//!
//! Failed attempts are kept per identifier as a list of timestamps inside a
//! sliding window. Reaching `max_attempts` failures inside the window sets a
//! lockout that expires on its own after `lockout_duration`.
//!
//! Nothing here runs on a timer. Old attempts are dropped and stale lockouts
//! deleted whenever the identifier is next looked at, so an identifier that
//! stops failing is forgiven implicitly once the window passes.
//!
//! Identifiers are stored under [`hash_identifier`], a 32-bit rolling hash.
//! It keeps raw emails out of local storage and nothing more: it collides
//! easily and MUST NOT be relied on for any security property. Its exact
//! output is part of the stored format.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::audit::{EventKind, SecurityEventLogger};
use crate::clock::Clock;
use crate::config::LockoutConfig;
use crate::error::StorageError;
use crate::storage::{keys, read_json, write_json, KeyValueStore};
use crate::utils::mask_identifier;

type AttemptMap = IndexMap<String, Vec<i64>>;
type LockoutMap = IndexMap<String, i64>;

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Allowed {
        attempts_remaining: u32,
        attempts: usize,
    },
    Locked {
        lockout_until: i64,
        attempts: usize,
    },
}

impl AttemptOutcome {
    pub fn is_locked(&self) -> bool {
        matches!(self, AttemptOutcome::Locked { .. })
    }

    pub fn attempts(&self) -> usize {
        match self {
            AttemptOutcome::Allowed { attempts, .. } | AttemptOutcome::Locked { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Result of a lockout check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LockoutStatus {
    Unlocked,
    Locked { lockout_until: i64, remaining_ms: i64 },
}

impl LockoutStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutStatus::Locked { .. })
    }
}

/// 32-bit rolling hash (`h = h * 31 + unit` over UTF-16 code units, wrapping)
/// rendered in signed base 36.
pub fn hash_identifier(identifier: &str) -> String {
    let hash = identifier
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_shl(5).wrapping_sub(h).wrapping_add(unit as i32));
    to_base36(hash)
}

fn to_base36(value: i32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let negative = value < 0;
    let mut n = (value as i64).unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    if negative {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// True if a failure at `t` still counts at `now`. Stamps so far off that
/// the age overflows are treated as outside the window.
fn in_window(t: i64, now: i64, window_ms: i64) -> bool {
    now.checked_sub(t).is_some_and(|age| age < window_ms)
}

/// Keep only timestamps inside `[now - window, now]`.
pub fn prune_window(timestamps: &[i64], now: i64, window_ms: i64) -> Vec<i64> {
    timestamps
        .iter()
        .copied()
        .filter(|&t| in_window(t, now, window_ms))
        .collect()
}

/// Milliseconds of lockout left, or `None` once `now >= lockout_until`.
pub fn lockout_remaining(lockout_until: i64, now: i64) -> Option<i64> {
    (now < lockout_until).then(|| lockout_until.saturating_sub(now))
}

/// Per-identifier failed-login rate limiter with lockout.
pub struct LoginAttemptTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: Arc<SecurityEventLogger>,
    config: LockoutConfig,
}

impl LoginAttemptTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        events: Arc<SecurityEventLogger>,
        config: LockoutConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            config,
        }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    pub fn hash_identifier(&self, identifier: &str) -> String {
        hash_identifier(identifier)
    }

    fn load_attempts(&self) -> Result<AttemptMap, StorageError> {
        Ok(read_json(self.store.as_ref(), keys::LOGIN_ATTEMPTS)?.unwrap_or_default())
    }

    fn load_lockouts(&self) -> Result<LockoutMap, StorageError> {
        Ok(read_json(self.store.as_ref(), keys::LOCKOUTS)?.unwrap_or_default())
    }

    /// Load a map for modification; malformed content is discarded.
    fn load_for_write<T: Default>(
        &self,
        loaded: Result<T, StorageError>,
        key: &str,
    ) -> Result<T, StorageError> {
        match loaded {
            Err(StorageError::Malformed { source, .. }) => {
                tracing::warn!("LOGIN_STATE_CORRUPTED | key={} error={} | resetting", key, source);
                Ok(T::default())
            }
            other => other,
        }
    }

    /// Failure timestamps for `identifier` still inside the window.
    pub fn attempts(&self, identifier: &str) -> Vec<i64> {
        let key = hash_identifier(identifier);
        match self.load_attempts() {
            Ok(map) => map
                .get(&key)
                .map(|ts| prune_window(ts, self.clock.now_ms(), self.config.attempt_window_ms))
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!("LOGIN_ATTEMPTS_UNREADABLE | error={}", e);
                Vec::new()
            }
        }
    }

    /// Record a failure and lock the identifier if the threshold is reached.
    ///
    /// Storage faults fail open: the caller is told the full attempt budget
    /// remains rather than being locked out by a broken store.
    pub fn record_failed_attempt(&self, identifier: &str) -> AttemptOutcome {
        match self.try_record_failed_attempt(identifier) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    "LOGIN_ATTEMPT_RECORD_FAILED | identifier={} error={} | failing open",
                    mask_identifier(identifier),
                    e
                );
                AttemptOutcome::Allowed {
                    attempts_remaining: self.config.max_attempts,
                    attempts: 0,
                }
            }
        }
    }

    fn try_record_failed_attempt(&self, identifier: &str) -> Result<AttemptOutcome, StorageError> {
        let key = hash_identifier(identifier);
        let now = self.clock.now_ms();
        let window = self.config.attempt_window_ms;

        let mut map = self.load_for_write(self.load_attempts(), keys::LOGIN_ATTEMPTS)?;
        let mut timestamps = map
            .get(&key)
            .map(|ts| prune_window(ts, now, window))
            .unwrap_or_default();
        timestamps.push(now);
        let attempts = timestamps.len();
        map.insert(key.clone(), timestamps);

        // Forget other identifiers whose history has aged out entirely
        map.retain(|_, ts| ts.iter().any(|&t| in_window(t, now, window)));
        write_json(self.store.as_ref(), keys::LOGIN_ATTEMPTS, &map)?;

        let max = self.config.max_attempts as usize;
        if attempts >= max {
            let lockout_until = self.try_set_lockout(&key, now)?;
            tracing::warn!(
                "ACCOUNT_LOCKED | identifier={} attempts={} until={}",
                mask_identifier(identifier),
                attempts,
                lockout_until
            );
            self.events.log(
                EventKind::AccountLocked,
                json!({
                    "identifier": key,
                    "attempts": attempts,
                    "lockoutUntil": lockout_until,
                }),
            );
            return Ok(AttemptOutcome::Locked {
                lockout_until,
                attempts,
            });
        }

        let attempts_remaining = (max - attempts) as u32;
        tracing::info!(
            "LOGIN_FAILED | identifier={} attempts={} remaining={}",
            mask_identifier(identifier),
            attempts,
            attempts_remaining
        );
        self.events.log(
            EventKind::LoginFailed,
            json!({
                "identifier": key,
                "attempts": attempts,
                "attemptsRemaining": attempts_remaining,
            }),
        );
        Ok(AttemptOutcome::Allowed {
            attempts_remaining,
            attempts,
        })
    }

    /// Forget all failures and any lockout for `identifier`. Called after a
    /// successful login.
    pub fn clear_attempts(&self, identifier: &str) {
        let key = hash_identifier(identifier);
        let mut removed = false;

        match self.load_for_write(self.load_attempts(), keys::LOGIN_ATTEMPTS) {
            Ok(mut map) => {
                if map.shift_remove(&key).is_some() {
                    removed = true;
                    if let Err(e) = write_json(self.store.as_ref(), keys::LOGIN_ATTEMPTS, &map) {
                        tracing::warn!("LOGIN_ATTEMPTS_CLEAR_FAILED | error={}", e);
                    }
                }
            }
            Err(e) => tracing::warn!("LOGIN_ATTEMPTS_CLEAR_FAILED | error={}", e),
        }

        removed |= self.remove_lockout(&key);

        if removed {
            tracing::info!(
                "LOGIN_ATTEMPTS_CLEARED | identifier={}",
                mask_identifier(identifier)
            );
            self.events
                .log(EventKind::LoginAttemptsCleared, json!({ "identifier": key }));
        }
    }

    /// Lock `identifier` for the configured duration from now. Returns the
    /// lockout expiry, or `None` if it could not be stored.
    pub fn set_lockout(&self, identifier: &str) -> Option<i64> {
        let key = hash_identifier(identifier);
        match self.try_set_lockout(&key, self.clock.now_ms()) {
            Ok(until) => Some(until),
            Err(e) => {
                tracing::warn!("LOCKOUT_PERSIST_FAILED | error={}", e);
                None
            }
        }
    }

    fn try_set_lockout(&self, key: &str, now: i64) -> Result<i64, StorageError> {
        let lockout_until = now.saturating_add(self.config.lockout_duration_ms);
        let mut map = self.load_for_write(self.load_lockouts(), keys::LOCKOUTS)?;
        map.insert(key.to_string(), lockout_until);
        write_json(self.store.as_ref(), keys::LOCKOUTS, &map)?;
        Ok(lockout_until)
    }

    /// Remove any lockout for `identifier`.
    pub fn clear_lockout(&self, identifier: &str) {
        self.remove_lockout(&hash_identifier(identifier));
    }

    /// Returns true if an entry was removed.
    fn remove_lockout(&self, key: &str) -> bool {
        let mut map = match self.load_for_write(self.load_lockouts(), keys::LOCKOUTS) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("LOCKOUT_CLEAR_FAILED | error={}", e);
                return false;
            }
        };
        if map.shift_remove(key).is_none() {
            return false;
        }
        if let Err(e) = write_json(self.store.as_ref(), keys::LOCKOUTS, &map) {
            tracing::warn!("LOCKOUT_CLEAR_FAILED | error={}", e);
        }
        true
    }

    /// Current lockout state. Expired entries are deleted on the way out.
    /// Unreadable state counts as unlocked.
    pub fn is_locked_out(&self, identifier: &str) -> LockoutStatus {
        let key = hash_identifier(identifier);
        let lockouts = match self.load_lockouts() {
            Ok(map) => map,
            Err(e) => {
                tracing::debug!("LOCKOUTS_UNREADABLE | error={}", e);
                return LockoutStatus::Unlocked;
            }
        };

        let Some(&lockout_until) = lockouts.get(&key) else {
            return LockoutStatus::Unlocked;
        };

        let now = self.clock.now_ms();
        match lockout_remaining(lockout_until, now) {
            Some(remaining_ms) => LockoutStatus::Locked {
                lockout_until,
                remaining_ms,
            },
            None => {
                if self.remove_lockout(&key) {
                    tracing::info!(
                        "LOCKOUT_EXPIRED | identifier={}",
                        mask_identifier(identifier)
                    );
                    self.events
                        .log(EventKind::LockoutExpired, json!({ "identifier": key }));
                }
                LockoutStatus::Unlocked
            }
        }
    }

    /// Number of identifiers currently locked (stale entries excluded).
    pub fn active_lockout_count(&self) -> usize {
        let now = self.clock.now_ms();
        self.load_lockouts()
            .map(|map| {
                map.values()
                    .filter(|&&until| lockout_remaining(until, now).is_some())
                    .count()
            })
            .unwrap_or(0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventContext;
    use crate::clock::ManualClock;
    use crate::config::EventLogConfig;
    use crate::storage::testing::BrokenStore;
    use crate::storage::MemoryStore;

    const EMAIL: &str = "user@example.com";
    const WINDOW: i64 = 15 * 60 * 1000;

    fn tracker() -> (LoginAttemptTracker, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let events = Arc::new(SecurityEventLogger::new(
            store.clone(),
            clock.clone(),
            EventContext::new("test", "app://test/"),
            EventLogConfig {
                max_events: 100,
                mirror_to_tracing: false,
            },
        ));
        let tracker =
            LoginAttemptTracker::new(store.clone(), clock.clone(), events, LockoutConfig::default());
        (tracker, clock, store)
    }

    #[test]
    fn test_hash_matches_reference_values() {
        assert_eq!(hash_identifier(""), "0");
        assert_eq!(hash_identifier("a"), "2p");
        // 'a' * 31 + 'b' = 3105
        assert_eq!(hash_identifier("ab"), "2e9");
        assert_eq!(hash_identifier(EMAIL), hash_identifier(EMAIL));
        assert_ne!(hash_identifier(EMAIL), hash_identifier("other@example.com"));
    }

    #[test]
    fn test_hash_wraps_to_negative() {
        let long = "zzzzzzzzzzzzzzzzzzzz";
        let h = hash_identifier(long);
        let parsed = i64::from_str_radix(&h, 36).unwrap();
        assert!(parsed >= i32::MIN as i64 && parsed <= i32::MAX as i64);
        assert_eq!(to_base36(i32::MIN), "-zik0zk");
        assert_eq!(to_base36(-1), "-1");
        assert_eq!(to_base36(35), "z");
    }

    #[test]
    fn test_below_threshold_is_not_locked() {
        let (tracker, clock, _) = tracker();
        for n in 1..5 {
            clock.set(n as i64);
            let outcome = tracker.record_failed_attempt(EMAIL);
            assert_eq!(
                outcome,
                AttemptOutcome::Allowed {
                    attempts_remaining: 5 - n,
                    attempts: n as usize
                }
            );
            assert_eq!(tracker.is_locked_out(EMAIL), LockoutStatus::Unlocked);
        }
    }

    #[test]
    fn test_fifth_failure_locks() {
        let (tracker, clock, _) = tracker();
        let mut last = None;
        for t in 0..5 {
            clock.set(t);
            last = Some(tracker.record_failed_attempt(EMAIL));
        }
        assert_eq!(
            last,
            Some(AttemptOutcome::Locked {
                lockout_until: 4 + WINDOW,
                attempts: 5
            })
        );

        clock.set(5);
        assert_eq!(
            tracker.is_locked_out(EMAIL),
            LockoutStatus::Locked {
                lockout_until: 4 + WINDOW,
                remaining_ms: WINDOW - 1
            }
        );
    }

    #[test]
    fn test_sliding_window_forgives_old_failures() {
        let (tracker, clock, _) = tracker();
        for t in 0..4 {
            clock.set(t);
            tracker.record_failed_attempt(EMAIL);
        }
        clock.set(3 + WINDOW + 1);
        assert!(tracker.attempts(EMAIL).is_empty());

        let outcome = tracker.record_failed_attempt(EMAIL);
        assert_eq!(
            outcome,
            AttemptOutcome::Allowed {
                attempts_remaining: 4,
                attempts: 1
            }
        );
        assert!(!tracker.is_locked_out(EMAIL).is_locked());
    }

    #[test]
    fn test_partial_window_expiry() {
        let (tracker, clock, _) = tracker();
        clock.set(0);
        tracker.record_failed_attempt(EMAIL);
        clock.set(WINDOW / 2);
        tracker.record_failed_attempt(EMAIL);
        clock.set(WINDOW);
        // The t=0 entry is exactly one window old and no longer counts
        assert_eq!(tracker.attempts(EMAIL), vec![WINDOW / 2]);
    }

    #[test]
    fn test_clear_attempts_unlocks() {
        let (tracker, clock, _) = tracker();
        for t in 0..5 {
            clock.set(t);
            tracker.record_failed_attempt(EMAIL);
        }
        assert!(tracker.is_locked_out(EMAIL).is_locked());

        tracker.clear_attempts(EMAIL);
        assert_eq!(tracker.is_locked_out(EMAIL), LockoutStatus::Unlocked);
        assert!(tracker.attempts(EMAIL).is_empty());
    }

    #[test]
    fn test_stale_lockout_is_deleted_on_read() {
        let (tracker, clock, store) = tracker();
        clock.set(1_000);
        let until = tracker.set_lockout(EMAIL).unwrap();
        assert_eq!(until, 1_000 + WINDOW);

        clock.set(until);
        assert_eq!(tracker.is_locked_out(EMAIL), LockoutStatus::Unlocked);
        let lockouts: LockoutMap = read_json(store.as_ref(), keys::LOCKOUTS).unwrap().unwrap();
        assert!(lockouts.is_empty());
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (tracker, clock, _) = tracker();
        for t in 0..5 {
            clock.set(t);
            tracker.record_failed_attempt(EMAIL);
        }
        assert!(!tracker.is_locked_out("someone@else.org").is_locked());
        assert_eq!(tracker.active_lockout_count(), 1);

        tracker.clear_lockout(EMAIL);
        assert_eq!(tracker.active_lockout_count(), 0);
    }

    #[test]
    fn test_raw_identifier_is_never_stored() {
        let (tracker, _, store) = tracker();
        tracker.record_failed_attempt(EMAIL);
        let raw = store.get(keys::LOGIN_ATTEMPTS).unwrap().unwrap();
        assert!(!raw.contains(EMAIL));
        assert!(raw.contains(&hash_identifier(EMAIL)));
    }

    #[test]
    fn test_storage_failure_fails_open() {
        let clock = Arc::new(ManualClock::new(0));
        let events = Arc::new(SecurityEventLogger::new(
            Arc::new(BrokenStore),
            clock.clone(),
            EventContext::new("t", "u"),
            EventLogConfig::default(),
        ));
        let tracker =
            LoginAttemptTracker::new(Arc::new(BrokenStore), clock, events, LockoutConfig::default());

        for _ in 0..10 {
            assert_eq!(
                tracker.record_failed_attempt(EMAIL),
                AttemptOutcome::Allowed {
                    attempts_remaining: 5,
                    attempts: 0
                }
            );
        }
        assert_eq!(tracker.is_locked_out(EMAIL), LockoutStatus::Unlocked);
        assert!(tracker.attempts(EMAIL).is_empty());
        assert!(tracker.set_lockout(EMAIL).is_none());
    }

    #[test]
    fn test_corrupt_attempt_map_is_reset() {
        let (tracker, _, store) = tracker();
        store.set(keys::LOGIN_ATTEMPTS, "[1, 2").unwrap();
        let outcome = tracker.record_failed_attempt(EMAIL);
        assert_eq!(outcome.attempts(), 1);
    }

    #[test]
    fn test_out_of_range_timestamps_are_dropped() {
        let (tracker, clock, store) = tracker();
        clock.set(1_700_000_000_000);
        let other = hash_identifier("other@example.com");
        store
            .set(
                keys::LOGIN_ATTEMPTS,
                &json!({ hash_identifier(EMAIL): [i64::MIN], other.clone(): [i64::MIN] }).to_string(),
            )
            .unwrap();

        assert!(tracker.attempts(EMAIL).is_empty());
        assert_eq!(tracker.record_failed_attempt(EMAIL).attempts(), 1);

        let stored: AttemptMap = read_json(store.as_ref(), keys::LOGIN_ATTEMPTS)
            .unwrap()
            .unwrap();
        assert!(!stored.contains_key(&other));
        assert_eq!(stored[&hash_identifier(EMAIL)], vec![1_700_000_000_000]);
    }

    #[test]
    fn test_out_of_range_lockouts() {
        let (tracker, clock, store) = tracker();
        clock.set(1_700_000_000_000);
        store
            .set(
                keys::LOCKOUTS,
                &json!({
                    hash_identifier(EMAIL): i64::MAX,
                    hash_identifier("other@example.com"): i64::MIN,
                })
                .to_string(),
            )
            .unwrap();

        assert_eq!(tracker.active_lockout_count(), 1);
        assert_eq!(
            tracker.is_locked_out(EMAIL),
            LockoutStatus::Locked {
                lockout_until: i64::MAX,
                remaining_ms: i64::MAX - 1_700_000_000_000,
            }
        );
        assert_eq!(tracker.is_locked_out("other@example.com"), LockoutStatus::Unlocked);
        let stored: LockoutMap = read_json(store.as_ref(), keys::LOCKOUTS).unwrap().unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_unclamped_lockout_duration_saturates() {
        let (_, clock, store) = tracker();
        clock.set(1_700_000_000_000);
        let events = Arc::new(SecurityEventLogger::new(
            store.clone(),
            clock.clone(),
            EventContext::new("test", "app://test/"),
            EventLogConfig::default(),
        ));
        let tracker = LoginAttemptTracker::new(
            store,
            clock,
            events,
            LockoutConfig {
                lockout_duration_ms: i64::MAX,
                ..LockoutConfig::default()
            },
        );
        assert_eq!(tracker.set_lockout(EMAIL), Some(i64::MAX));
        assert!(tracker.is_locked_out(EMAIL).is_locked());
    }

    #[test]
    fn test_outcome_serialization() {
        let locked = AttemptOutcome::Locked {
            lockout_until: 10,
            attempts: 5,
        };
        let value = serde_json::to_value(locked).unwrap();
        assert_eq!(value["status"], "locked");
        assert_eq!(value["lockout_until"], 10);
    }
}
