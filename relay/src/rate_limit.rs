use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Global pace governor: successive outbound calls are spaced by at least
/// `min_interval`. Callers reserve their slot under the lock and sleep
/// outside of it, so concurrent callers queue up one interval apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call_at: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call_at: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn wait_turn(&self) {
        let slot = {
            let mut guard = self.last_call_at.lock();
            let now = Instant::now();
            let slot = match *guard {
                Some(last) => now.max(last + self.min_interval),
                None => now,
            };
            *guard = Some(slot);
            slot
        };
        let now = Instant::now();
        if slot > now {
            trace!(wait_ms = (slot - now).as_millis() as u64, "rate limiter delaying call");
            sleep_until(slot).await;
        }
    }
}
