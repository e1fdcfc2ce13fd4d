use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Async token bucket.
///
/// The full quota becomes available at the start of each interval; `acquire`
/// suspends until a token is free. Waiters are served in the order the inner
/// mutex hands it to them, which is the only fairness guarantee.
pub struct RateLimiter {
    interval: Duration,
    requests_per_interval: u32,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    available: u32,
    window_end: Instant,
}

impl RateLimiter {
    pub fn new(interval_ms: u64, requests_per_interval: u32) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            requests_per_interval,
            bucket: Mutex::new(Bucket {
                available: requests_per_interval,
                window_end: Instant::now() + Duration::from_millis(interval_ms),
            }),
        }
    }

    /// Takes one token, waiting for the next interval when the current
    /// quota is exhausted.
    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                if now >= bucket.window_end {
                    bucket.available = self.requests_per_interval;
                    bucket.window_end = now + self.interval;
                }
                if bucket.available > 0 {
                    bucket.available -= 1;
                    return;
                }
                bucket.window_end
            };
            tokio::time::sleep_until(wait_until).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_quota_is_available_immediately() {
        let limiter = RateLimiter::new(1000, 3);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_bucket_waits_for_next_interval() {
        let limiter = RateLimiter::new(1000, 1);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_quota_refills_each_interval() {
        let limiter = RateLimiter::new(1000, 2);
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        let first_wait = start.elapsed();
        limiter.acquire().await;
        // Second token of the new window comes for free.
        assert_eq!(start.elapsed(), first_wait);
    }
}
