// SPDX-License-Identifier: MIT OR Apache-2.0
//! The fixed-window admission check.

use crate::store::{CounterStore, MemoryCounterStore};
use std::sync::Arc;
use std::time::Duration;
use tg_core::{GatewayError, GatewayResult};
use uuid::Uuid;

/// Default ceiling per window.
pub const DEFAULT_LIMIT: u32 = 100;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Fixed-window rate limiter over a [`CounterStore`].
///
/// The first request in a window sets the counter to 1 with a TTL equal to
/// the window; subsequent requests increment it; on overflow the check
/// fails with `rate_limited` and a `retry_after` equal to the remaining
/// TTL, never below one second.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    default_limit: u32,
    default_window: Duration,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, default_limit: u32, default_window: Duration) -> Self {
        Self {
            store,
            default_limit,
            default_window,
        }
    }

    /// Limiter backed by an in-process store with the default ceiling and
    /// window. Suitable for tests and single-node deployments.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryCounterStore::new()),
            DEFAULT_LIMIT,
            DEFAULT_WINDOW,
        )
    }

    fn bucket_key(instance_id: Uuid) -> String {
        format!("rate_limit:{instance_id}")
    }

    /// Admit or reject one request for `instance_id`.
    ///
    /// `limit` and `window` override the limiter defaults per call, which
    /// is how per-instance ceilings are applied.
    ///
    /// # Errors
    ///
    /// `rate_limited` with `retry_after` set when the window is full.
    pub async fn check(
        &self,
        instance_id: Uuid,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> GatewayResult<()> {
        let limit = limit.unwrap_or(self.default_limit);
        let window = window.unwrap_or(self.default_window);
        let key = Self::bucket_key(instance_id);

        let Some(count) = self.store.get(&key).await else {
            // First request in a fresh window.
            self.store.set_with_ttl(&key, 1, window).await;
            return Ok(());
        };

        if count >= u64::from(limit) {
            let retry_after = self
                .store
                .ttl(&key)
                .await
                .map_or(window.as_secs(), |ttl| ttl.as_secs());
            return Err(GatewayError::rate_limited(
                format!(
                    "rate limit exceeded for instance {instance_id}: {limit} requests per {}s",
                    window.as_secs()
                ),
                retry_after,
            ));
        }

        self.store.incr(&key).await;
        Ok(())
    }

    /// Requests left in the current window for `instance_id`.
    pub async fn remaining(&self, instance_id: Uuid, limit: Option<u32>) -> u64 {
        let limit = u64::from(limit.unwrap_or(self.default_limit));
        let key = Self::bucket_key(instance_id);
        match self.store.get(&key).await {
            Some(count) => limit.saturating_sub(count),
            None => limit,
        }
    }

    /// Clear the window for `instance_id`.
    pub async fn reset(&self, instance_id: Uuid) {
        self.store.delete(&Self::bucket_key(instance_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::ErrorKind;

    #[tokio::test]
    async fn admits_up_to_ceiling_then_rejects() {
        let limiter = RateLimiter::in_memory();
        let instance = Uuid::new_v4();

        for _ in 0..3 {
            limiter.check(instance, Some(3), None).await.unwrap();
        }
        let err = limiter.check(instance, Some(3), None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        let retry_after = err.retry_after.unwrap();
        assert!((1..=60).contains(&retry_after), "retry_after={retry_after}");
    }

    #[tokio::test]
    async fn instances_have_independent_windows() {
        let limiter = RateLimiter::in_memory();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        limiter.check(a, Some(1), None).await.unwrap();
        assert!(limiter.check(a, Some(1), None).await.is_err());
        limiter.check(b, Some(1), None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_the_counter() {
        let limiter = RateLimiter::in_memory();
        let instance = Uuid::new_v4();
        let window = Duration::from_secs(60);

        limiter.check(instance, Some(1), Some(window)).await.unwrap();
        assert!(limiter.check(instance, Some(1), Some(window)).await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.check(instance, Some(1), Some(window)).await.unwrap();
    }

    #[tokio::test]
    async fn remaining_counts_down_and_reset_restores() {
        let limiter = RateLimiter::in_memory();
        let instance = Uuid::new_v4();

        assert_eq!(limiter.remaining(instance, Some(5)).await, 5);
        limiter.check(instance, Some(5), None).await.unwrap();
        limiter.check(instance, Some(5), None).await.unwrap();
        assert_eq!(limiter.remaining(instance, Some(5)).await, 3);

        limiter.reset(instance).await;
        assert_eq!(limiter.remaining(instance, Some(5)).await, 5);
    }

    #[tokio::test]
    async fn retry_after_never_below_one_second() {
        let limiter = RateLimiter::in_memory();
        let instance = Uuid::new_v4();
        let window = Duration::from_millis(300);

        limiter.check(instance, Some(1), Some(window)).await.unwrap();
        let err = limiter
            .check(instance, Some(1), Some(window))
            .await
            .unwrap_err();
        assert!(err.retry_after.unwrap() >= 1);
    }
}
