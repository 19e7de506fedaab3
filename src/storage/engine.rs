//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the keyspace behind every driftkv command.
//! Each key maps to one [`Entry`]: a string value plus an optional
//! absolute deadline. Entries without a deadline are permanent.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                StorageEngine                 │
//! │   ┌──────────────────────────────────────┐   │
//! │   │   RwLock<HashMap<Bytes, Entry>>      │   │
//! │   │   value + deadline live together     │   │
//! │   └──────────────────────────────────────┘   │
//! └──────────────────────────────────────────────┘
//!        ▲                ▲               ▲
//!   session task     session task    ExpirySweeper
//! ```
//!
//! The whole keyspace sits behind one lock, so `FLUSHALL` and multi-key
//! `DEL` each run inside a single critical section. Readers share the lock;
//! any path that discovers an expired entry re-checks it under the write
//! lock before removing it.
//!
//! ## Liveness
//!
//! A key is live when it has no deadline or its deadline is strictly in
//! the future. Every read path checks liveness itself, so an entry the
//! sweeper has not reached yet is never handed back to a client.
//!
//! Time is read through [`tokio::time::Instant`], which follows tokio's
//! paused clock in tests and the monotonic clock everywhere else.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound for a relative expiry (100 years).
const MAX_EXPIRE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Reply of TTL/PTTL for a key that is absent or expired.
pub const TTL_MISSING: i64 = -2;

/// Reply of TTL/PTTL for a live key without a deadline.
pub const TTL_PERSISTENT: i64 = -1;

/// A stored value with its optional deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The stored string
    pub value: Bytes,
    /// When this entry stops being live (None = never)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a permanent entry.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Returns true if the deadline is at or before `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Checks the entry against the current time.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before the deadline, or None for a permanent entry.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(now))
    }
}

/// Keyspace statistics, reported by `INFO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Raw entry count, including entries not yet swept
    pub keys: u64,
    /// GETs that found a live key
    pub keyspace_hits: u64,
    /// GETs that found nothing
    pub keyspace_misses: u64,
    /// Entries removed because their deadline passed (lazily or by the sweeper)
    pub expired: u64,
}

/// The keyspace shared by every session and the sweeper.
///
/// Wrap it in an `Arc` and hand a clone to each task. No operation here
/// fails; argument validation happens in the command layer.
///
/// # Example
///
/// ```
/// use driftkv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("drift"));
/// assert_eq!(engine.get(&Bytes::from("name")), Some(Bytes::from("drift")));
/// assert_eq!(engine.ttl(&Bytes::from("name")), -1);
///
/// assert!(engine.expire(&Bytes::from("name"), 0));
/// assert_eq!(engine.get(&Bytes::from("name")), None);
/// ```
pub struct StorageEngine {
    data: RwLock<HashMap<Bytes, Entry>>,

    keyspace_hits: AtomicU64,

    keyspace_misses: AtomicU64,

    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("expired", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            keyspace_hits: AtomicU64::new(0),
            keyspace_misses: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock must not take the keyspace down with it:
    // every mutation below leaves the map consistent before it can unwind.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a key, replacing any previous value and clearing its deadline.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.write().insert(key, Entry::new(value)).is_none()
    }

    /// Gets the live value for a key.
    ///
    /// An entry observed past its deadline is removed before returning `None`
    /// (lazy expiry), so keys nobody reads again still get reclaimed here or
    /// by the sweeper.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let value = self.live_entry(key).map(|entry| entry.value);

        let counter = if value.is_some() {
            &self.keyspace_hits
        } else {
            &self.keyspace_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);

        value
    }

    /// Returns a copy of the live entry for a key, purging it if expired.
    pub fn live_entry(&self, key: &Bytes) -> Option<Entry> {
        {
            let data = self.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired under the read lock; re-check under the write lock since
        // another session may have rewritten the key in between.
        let mut data = self.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Deletes a batch of keys inside one critical section.
    ///
    /// # Returns
    ///
    /// The number of live keys removed. An entry whose deadline already
    /// passed is still removed but does not count, matching what a `GET`
    /// would have reported for it.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        let now = Instant::now();
        let mut data = self.write();
        let mut deleted = 0;

        for key in keys {
            if let Some(entry) = data.remove(key) {
                if entry.is_expired_at(now) {
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                } else {
                    deleted += 1;
                }
            }
        }

        deleted
    }

    /// Deletes a single key. Returns `true` if a live key was removed.
    pub fn delete(&self, key: &Bytes) -> bool {
        self.delete_many(std::slice::from_ref(key)) == 1
    }

    /// Checks if a key is live.
    pub fn exists(&self, key: &Bytes) -> bool {
        self.read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Counts how many of the given keys are live. Repeated keys count each time.
    pub fn exists_many(&self, keys: &[Bytes]) -> u64 {
        let now = Instant::now();
        let data = self.read();

        keys.iter()
            .filter(|key| data.get(*key).is_some_and(|e| !e.is_expired_at(now)))
            .count() as u64
    }

    /// Sets a deadline `seconds` from now on a live key, keeping its value.
    ///
    /// Zero or negative `seconds` puts the deadline at or before now, so the
    /// key reads as absent from the next observation on.
    ///
    /// # Returns
    ///
    /// Returns `true` if the deadline was set, `false` if the key is absent or expired.
    pub fn expire(&self, key: &Bytes, seconds: i64) -> bool {
        let now = Instant::now();
        let deadline = deadline_after(now, seconds);
        let mut data = self.write();

        match data.get_mut(key) {
            Some(entry) if entry.is_expired_at(now) => {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        }
    }

    /// Remaining lifetime in whole seconds, rounded up.
    ///
    /// Returns [`TTL_MISSING`] (-2) for an absent or expired key and
    /// [`TTL_PERSISTENT`] (-1) for a key without a deadline.
    pub fn ttl(&self, key: &Bytes) -> i64 {
        self.remaining(key, |left| {
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            i64::try_from(secs).unwrap_or(i64::MAX)
        })
    }

    /// Remaining lifetime in milliseconds, rounded up. Same sentinels as [`ttl`](Self::ttl).
    pub fn pttl(&self, key: &Bytes) -> i64 {
        self.remaining(key, |left| {
            let millis = left.as_millis() + u128::from(left.as_nanos() % 1_000_000 > 0);
            i64::try_from(millis).unwrap_or(i64::MAX)
        })
    }

    fn remaining(&self, key: &Bytes, unit: impl Fn(Duration) -> i64) -> i64 {
        let now = Instant::now();
        match self.live_entry(key) {
            None => TTL_MISSING,
            Some(entry) => entry
                .remaining(now)
                .map(|left| unit(left).max(0))
                .unwrap_or(TTL_PERSISTENT),
        }
    }

    /// Returns a snapshot of all live keys, in no particular order.
    ///
    /// Expired entries are skipped but left for the sweeper.
    pub fn keys(&self) -> Vec<Bytes> {
        let now = Instant::now();
        self.read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns `"string"` for a live key and `"none"` otherwise.
    pub fn key_type(&self, key: &Bytes) -> &'static str {
        if self.live_entry(key).is_some() {
            "string"
        } else {
            "none"
        }
    }

    /// Removes every entry, values and deadlines together.
    pub fn flush(&self) {
        self.write().clear();
    }

    /// Raw number of stored entries, including expired ones the sweeper
    /// has not removed yet.
    pub fn len(&self) -> u64 {
        self.read().len() as u64
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns keyspace statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            keyspace_hits: self.keyspace_hits.load(Ordering::Relaxed),
            keyspace_misses: self.keyspace_misses.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Removes every entry whose deadline is at or before `now`.
    ///
    /// This is one sweep cycle; the write lock is held only for the removal pass.
    ///
    /// # Returns
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired_at(&self, now: Instant) -> u64 {
        let mut data = self.write();
        let before = data.len();

        data.retain(|_, entry| !entry.is_expired_at(now));

        let cleaned = (before - data.len()) as u64;
        if cleaned > 0 {
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }
        cleaned
    }

    /// Removes every entry that has expired as of now.
    pub fn cleanup_expired(&self) -> u64 {
        self.cleanup_expired_at(Instant::now())
    }
}

/// Computes `now + seconds`, clamping far-future values and treating
/// negative ones as already elapsed.
fn deadline_after(now: Instant, seconds: i64) -> Instant {
    if seconds <= 0 {
        let back = Duration::from_secs(seconds.unsigned_abs());
        return now.checked_sub(back).unwrap_or(now);
    }

    now + Duration::from_secs(seconds.unsigned_abs().min(MAX_EXPIRE_SECS))
}
