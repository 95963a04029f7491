//! Per-provider request pacing over a sliding one-minute window

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);
const SLACK: Duration = Duration::from_millis(10);

/// Sliding-window limiter over requests/minute and tokens/minute.
///
/// A limit of `0` disables that dimension.
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
    token_usage: Mutex<VecDeque<(Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, tokens_per_minute, WINDOW)
    }

    /// Limiter over a custom window length
    pub fn with_window(requests_per_minute: u32, tokens_per_minute: u32, window: Duration) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute,
            window,
            requests: Mutex::new(VecDeque::new()),
            token_usage: Mutex::new(VecDeque::new()),
        }
    }

    /// Unlimited in both dimensions
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    pub fn tokens_per_minute(&self) -> u32 {
        self.tokens_per_minute
    }

    /// Wait until both the request and token budgets allow another call,
    /// then record the request.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.request_wait().await {
                Some(wait) => Some(wait),
                None => self.token_wait().await,
            };

            match wait {
                Some(wait) => {
                    tracing::debug!("Rate limiter waiting {}ms", wait.as_millis());
                    tokio::time::sleep(wait).await;
                }
                None => {
                    let mut requests = self.requests.lock().await;
                    // Re-check under the lock; another task may have taken the slot
                    prune(&mut requests, Instant::now(), self.window, |t| *t);
                    if self.requests_per_minute == 0
                        || requests.len() < self.requests_per_minute as usize
                    {
                        requests.push_back(Instant::now());
                        return;
                    }
                }
            }
        }
    }

    async fn request_wait(&self) -> Option<Duration> {
        if self.requests_per_minute == 0 {
            return None;
        }

        let mut requests = self.requests.lock().await;
        let now = Instant::now();
        prune(&mut requests, now, self.window, |t| *t);

        if requests.len() < self.requests_per_minute as usize {
            return None;
        }
        let oldest = *requests.front()?;
        Some(self.window.saturating_sub(now.duration_since(oldest)) + SLACK)
    }

    async fn token_wait(&self) -> Option<Duration> {
        if self.tokens_per_minute == 0 {
            return None;
        }

        let mut usage = self.token_usage.lock().await;
        let now = Instant::now();
        prune(&mut usage, now, self.window, |(t, _)| *t);

        let used: u64 = usage.iter().map(|(_, n)| *n as u64).sum();
        if used < self.tokens_per_minute as u64 {
            return None;
        }
        let (oldest, _) = *usage.front()?;
        Some(self.window.saturating_sub(now.duration_since(oldest)) + SLACK)
    }

    /// Record tokens consumed by a finished call
    pub async fn record_tokens(&self, tokens: u32) {
        let mut usage = self.token_usage.lock().await;
        let now = Instant::now();
        prune(&mut usage, now, self.window, |(t, _)| *t);
        usage.push_back((now, tokens));
    }

    /// Tokens recorded in the current window
    pub async fn current_token_usage(&self) -> u32 {
        let mut usage = self.token_usage.lock().await;
        prune(&mut usage, Instant::now(), self.window, |(t, _)| *t);
        usage.iter().map(|(_, n)| *n).sum()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

fn prune<T>(queue: &mut VecDeque<T>, now: Instant, window: Duration, at: impl Fn(&T) -> Instant) {
    while let Some(front) = queue.front() {
        if now.duration_since(at(front)) > window {
            queue.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(5, 1000);

        // Should be able to make 5 requests immediately
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_request_limit_waits_for_window() {
        let limiter = RateLimiter::with_window(2, 0, Duration::from_millis(100));

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_token_recording() {
        let limiter = RateLimiter::new(60, 1000);

        limiter.record_tokens(100).await;
        limiter.record_tokens(200).await;

        assert_eq!(limiter.current_token_usage().await, 300);
    }

    #[tokio::test]
    async fn test_token_usage_expires() {
        let limiter = RateLimiter::with_window(0, 100, Duration::from_millis(50));

        limiter.record_tokens(150).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(limiter.current_token_usage().await, 0);
        limiter.acquire().await;
    }
}
