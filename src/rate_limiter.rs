//! Minimum-interval pacing for outbound backend calls.
//!
//! Hosted models enforce requests-per-minute quotas. Rather than burning
//! retries on `429`s, the backend waits until at least `60s / rpm` has passed
//! since the previous call started. Concurrent callers queue on the lock and
//! are released one interval apart.

use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

impl RateLimiter {
    /// `requests_per_minute == 0` disables pacing.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let min_interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / requests_per_minute
        };
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next call is allowed, then claim the slot.
    pub async fn wait_if_needed(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                debug!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "Rate limiting");
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_rpm() {
        assert_eq!(RateLimiter::per_minute(15).min_interval(), Duration::from_secs(4));
        assert_eq!(RateLimiter::per_minute(0).min_interval(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_is_immediate_then_paced() {
        let limiter = RateLimiter::per_minute(15);
        let t0 = Instant::now();

        limiter.wait_if_needed().await;
        assert_eq!(t0.elapsed(), Duration::ZERO);

        limiter.wait_if_needed().await;
        assert!(t0.elapsed() >= Duration::from_secs(4));

        limiter.wait_if_needed().await;
        assert!(t0.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_passed() {
        let limiter = RateLimiter::per_minute(60);
        limiter.wait_if_needed().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let t0 = Instant::now();
        limiter.wait_if_needed().await;
        assert_eq!(t0.elapsed(), Duration::ZERO);
    }
}
