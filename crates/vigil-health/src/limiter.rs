//! Per-service token-bucket rate limiting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::clock::{deadline_after, saturating_secs_f64};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("cancelled while waiting for a rate limit token")]
    Cancelled,
    #[error("rate limit exceeded")]
    Exceeded,
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(saturating_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

/// Steady `rate` tokens per second with a burst of twice that.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// `rate` must be positive and finite.
    pub fn new(rate: f64) -> Self {
        let capacity = (rate * 2.0).max(1.0);
        Self {
            bucket: Mutex::new(TokenBucket {
                capacity,
                tokens: capacity,
                rate,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.bucket.lock().expect("rate limiter lock").capacity
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.bucket
            .lock()
            .expect("rate limiter lock")
            .try_acquire(Instant::now())
            .is_ok()
    }

    /// Wait for a token for at most `max_wait`.
    ///
    /// Fails fast with [`LimitError::Exceeded`] when the next token lies
    /// beyond the deadline, so a caller never sleeps for nothing.
    pub async fn acquire(
        &self,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), LimitError> {
        let deadline = deadline_after(Instant::now(), max_wait);
        loop {
            let now = Instant::now();
            let wait = match self.bucket.lock().expect("rate limiter lock").try_acquire(now) {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            if now.checked_add(wait).is_none_or(|ready| ready > deadline) {
                return Err(LimitError::Exceeded);
            }

            // Sleep outside the lock.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LimitError::Cancelled),
                _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
            }
        }
    }
}

/// One limiter per service name, all sharing the same rate.
pub struct LimiterRegistry {
    rate: f64,
    limiters: Registry<RateLimiter>,
}

impl LimiterRegistry {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            limiters: Registry::new(),
        }
    }

    pub fn get(&self, service: &str) -> Arc<RateLimiter> {
        self.limiters
            .get_or_create(service, || RateLimiter::new(self.rate))
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_twice_the_rate() {
        let limiter = RateLimiter::new(2.0);
        assert_eq!(limiter.capacity(), 4.0);
        for _ in 0..4 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn fractional_rates_still_allow_one_call() {
        let limiter = RateLimiter::new(0.1);
        assert_eq!(limiter.capacity(), 1.0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_refill() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancellationToken::new();
        limiter.acquire(Duration::ZERO, &cancel).await.unwrap();
        limiter.acquire(Duration::ZERO, &cancel).await.unwrap();

        let start = Instant::now();
        limiter.acquire(Duration::from_secs(5), &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_when_deadline_is_too_short() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancellationToken::new();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        let err = limiter
            .acquire(Duration::from_millis(100), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LimitError::Exceeded);
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let limiter = RateLimiter::new(0.01);
        assert!(limiter.try_acquire());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = limiter
            .acquire(Duration::from_secs(3600), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LimitError::Cancelled);
    }

    #[tokio::test]
    async fn vanishing_rate_is_exceeded_not_a_panic() {
        let limiter = RateLimiter::new(1e-30);
        let cancel = CancellationToken::new();
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        let err = limiter
            .acquire(Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, LimitError::Exceeded);
    }

    #[tokio::test]
    async fn unbounded_wait_does_not_overflow_the_deadline() {
        let limiter = RateLimiter::new(1.0);
        let cancel = CancellationToken::new();
        limiter.acquire(Duration::MAX, &cancel).await.unwrap();
    }

    #[test]
    fn registry_shares_limiter_per_service() {
        let registry = LimiterRegistry::new(1.0);
        let a = registry.get("api");
        assert!(Arc::ptr_eq(&a, &registry.get("api")));
        assert!(!Arc::ptr_eq(&a, &registry.get("db")));
        assert_eq!(registry.len(), 2);
    }
}
