//! Token-bucket rate limiting for registry calls

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket shared by every check in a batch.
///
/// Configured as `(requests_per_minute, burst)`: the bucket holds at most
/// `burst` tokens and refills continuously at `requests_per_minute / 60`
/// tokens per second. [`RateLimiter::acquire`] takes one token, sleeping
/// until one is available. The wait suspends cooperatively, so an enclosing
/// timeout or dropped future cancels it promptly.
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_sec: f64::from(requests_per_minute.max(1)) / 60.0,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting for refill if the bucket is empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_sec)
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test]
    async fn burst_tokens_are_granted_without_waiting() {
        let limiter = RateLimiter::new(60, 3);
        for _ in 0..3 {
            limiter.acquire().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drained_bucket_waits_for_refill() {
        let limiter = RateLimiter::new(60, 1); // 1 token/sec
        limiter.acquire().await;

        let acquired = tokio::select! {
            biased;
            _ = limiter.acquire() => true,
            _ = tokio::time::sleep(Duration::from_millis(10)) => false,
        };
        assert!(!acquired, "empty bucket should not grant immediately");

        advance(Duration::from_secs(2)).await;
        limiter.acquire().await;
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_respects_enclosing_timeout() {
        let limiter = RateLimiter::new(60, 1);
        limiter.acquire().await;

        let result =
            tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(result.is_err(), "cancelled wait should fail fast");
    }
}
