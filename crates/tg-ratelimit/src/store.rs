// SPDX-License-Identifier: MIT OR Apache-2.0
//! Counter storage behind the rate limiter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A shared integer store with TTL semantics.
///
/// The operation set mirrors the Redis commands a shared deployment would
/// use (`SETEX`, `INCR`, `TTL`, `DEL`), so a networked implementation can
/// drop in behind the same limiter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value of `key`, if present and not expired.
    async fn get(&self, key: &str) -> Option<u64>;

    /// Set `key` to `value` with a time-to-live.
    async fn set_with_ttl(&self, key: &str, value: u64, ttl: Duration);

    /// Increment `key` and return the new value. Incrementing a missing
    /// key creates it with no expiry, as the Redis command does.
    async fn incr(&self, key: &str) -> u64;

    /// Remaining time-to-live of `key`, if present and expiring.
    async fn ttl(&self, key: &str) -> Option<Duration>;

    /// Remove `key`.
    async fn delete(&self, key: &str);
}

struct Entry {
    value: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process [`CounterStore`] guarded by a single mutex.
///
/// Expired entries are dropped lazily on access. The mutex is never held
/// across an await.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value),
            None => None,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: u64, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    async fn incr(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.expired(now) => {
                entry.value += 1;
                entry.value
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: 1,
                        expires_at: None,
                    },
                );
                1
            }
        }
    }

    async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let entry = entries.get(key)?;
        let expires_at = entry.expires_at?;
        if expires_at <= now {
            return None;
        }
        Some(expires_at - now)
    }

    async fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
    }
}
