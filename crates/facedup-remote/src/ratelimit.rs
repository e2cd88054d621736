//! Sliding-window rate limiter shared by every outbound request.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_MAX_REQUESTS: usize = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// At most `max_requests` admissions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Callers wait for a slot instead of being rejected.
///
/// The queue lock is held while a caller sleeps, so waiting callers are
/// admitted in arrival order.
pub struct RateLimiter {
    limit: RateLimit,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        let limit = RateLimit {
            max_requests: limit.max_requests.max(1),
            window: limit.window,
        };
        Self {
            admitted: Mutex::new(VecDeque::with_capacity(limit.max_requests)),
            limit,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Wait until a request may be sent, then record it.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;
        loop {
            let now = Instant::now();
            while admitted
                .front()
                .is_some_and(|&t| now.duration_since(t) >= self.limit.window)
            {
                admitted.pop_front();
            }

            if admitted.len() < self.limit.max_requests {
                admitted.push_back(now);
                return;
            }

            if let Some(&oldest) = admitted.front() {
                let until = oldest + self.limit.window;
                tracing::debug!(
                    wait_ms = until.duration_since(now).as_millis() as u64,
                    in_window = admitted.len(),
                    "rate limit reached; waiting"
                );
                tokio::time::sleep_until(until).await;
            }
        }
    }
}
