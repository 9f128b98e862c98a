//! Token-bucket limiter guarding outbound calls to the source CRM
//! (spec.md §5.1: stay under the documented source-API quota).

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Refills continuously at `rate_per_sec`, capped at `burst`. `acquire()`
/// sleeps (without holding the lock) until a token is available rather
/// than returning an error, since the extractor always wants to proceed
/// eventually and has its own retry/backoff layer for actual failures.
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            rate_per_sec,
            burst,
            bucket: Mutex::new(Bucket { tokens: burst, last_refill: Instant::now() }),
        }
    }

    fn try_take(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - bucket.tokens;
            Some(Duration::from_secs_f64(deficit / self.rate_per_sec))
        }
    }

    /// Block the calling task until a token is available.
    pub async fn acquire(&self) {
        loop {
            match self.try_take() {
                None => return,
                Some(wait) => sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_then_throttles() {
        let limiter = RateLimiter::new(10.0, 2.0);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // third call exhausts the burst and must wait roughly 1/rate seconds
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
