//! Failure classification and jittered exponential backoff

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::providers::ProviderError;

/// How the dispatcher reacts to a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Back off and re-run the unfinished work
    Retryable,
    /// Abort the whole run
    Fatal,
}

impl FailureClass {
    pub fn of(error: &ProviderError) -> Self {
        if error.is_retryable() {
            FailureClass::Retryable
        } else {
            FailureClass::Fatal
        }
    }
}

/// `base * (1 + jitter)^retry` with `jitter` in `[0, 1)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn delay(&self, retry: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(0.0, 1.0);
        self.base.mul_f64((1.0 + jitter).powi(retry as i32))
    }

    /// Mean delay over uniform jitter: `base * (2^(retry+1) - 1) / (retry+1)`
    pub fn expected_delay(&self, retry: u32) -> Duration {
        let r = retry as f64;
        self.base.mul_f64((2f64.powf(r + 1.0) - 1.0) / (r + 1.0))
    }
}

/// Tracks retries across whole-batch re-runs of one dispatch
pub struct RetryController {
    max_retries: u32,
    backoff: Backoff,
    rng: StdRng,
    attempts: u32,
    retries: u32,
    delays: Vec<Duration>,
}

impl RetryController {
    pub fn new(max_retries: u32, backoff: Backoff, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            max_retries,
            backoff,
            rng,
            attempts: 0,
            retries: 0,
            delays: Vec::new(),
        }
    }

    /// Mark the start of a dispatch attempt; returns its 1-based number
    pub fn attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Register a retryable failure of the current attempt.
    ///
    /// Returns the delay to sleep before the next attempt, or `None` once the
    /// retry budget is spent.
    pub fn on_retryable(&mut self) -> Option<Duration> {
        self.retries += 1;
        if self.retries >= self.max_retries {
            return None;
        }
        let jitter: f64 = self.rng.gen();
        let delay = self.backoff.delay(self.retries, jitter);
        self.delays.push(delay);
        Some(delay)
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn into_delays(self) -> Vec<Duration> {
        self.delays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            FailureClass::of(&ProviderError::RateLimited { retry_after_ms: 0 }),
            FailureClass::Retryable
        );
        assert_eq!(
            FailureClass::of(&ProviderError::Auth("revoked".into())),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_delay_bounds() {
        let backoff = Backoff::new(Duration::from_secs(2));

        assert_eq!(backoff.delay(0, 0.7), Duration::from_secs(2));
        assert_eq!(backoff.delay(2, 0.0), Duration::from_secs(2));
        assert_eq!(backoff.delay(2, 1.0), Duration::from_secs(8));
        assert!(backoff.delay(3, 0.5) > backoff.delay(3, 0.4));
    }

    #[test]
    fn test_expected_delay_increases() {
        let backoff = Backoff::new(Duration::from_millis(1000));

        assert_eq!(backoff.expected_delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.expected_delay(1), Duration::from_millis(1500));
        for retry in 0..10 {
            assert!(backoff.expected_delay(retry + 1) > backoff.expected_delay(retry));
        }
    }

    #[test]
    fn test_budget_is_exhausted_at_max_retries() {
        let mut controller = RetryController::new(3, Backoff::new(Duration::from_millis(10)), Some(7));

        assert!(controller.on_retryable().is_some());
        assert!(controller.on_retryable().is_some());
        assert!(controller.on_retryable().is_none());
        assert_eq!(controller.retries(), 3);
        assert_eq!(controller.delays().len(), 2);
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let run = |seed| {
            let mut c = RetryController::new(5, Backoff::new(Duration::from_millis(100)), Some(seed));
            (0..4).filter_map(|_| c.on_retryable()).collect::<Vec<_>>()
        };

        assert_eq!(run(11), run(11));
        for (i, delay) in run(11).iter().enumerate() {
            let retry = i as u32 + 1;
            let backoff = Backoff::new(Duration::from_millis(100));
            assert!(*delay >= backoff.delay(retry, 0.0));
            assert!(*delay <= backoff.delay(retry, 1.0));
        }
    }
}
