//! Exponential backoff for dispatch retries.
//!
//! Defaults match the dispatch error taxonomy: three attempts at 0.5s, 2s,
//! then 8s, each jittered by ±25% to avoid a thundering herd when a provider
//! comes back up after an outage.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_interval: f64,
    pub backoff_factor: f64,
    pub max_interval: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 4.0,
            max_interval: 8.0,
            jitter: true,
        }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry `attempt` (0-indexed), capped and jittered.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::from_secs(0);
        }
        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval);
        let final_delay = if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };
        Duration::from_secs_f64(final_delay)
    }

    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Tracks attempts made so far for one dispatch, surfaced on `NodeRun` so a
/// caller can see why a node succeeded on its second try.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: usize,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_the_0_5_2_8_schedule_before_jitter() {
        let policy = RetryPolicy::default().with_jitter(false);
        assert_eq!(policy.calculate_delay(0), Duration::from_secs_f64(0.5));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs_f64(2.0));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs_f64(8.0));
    }

    #[test]
    fn jitter_stays_within_25_percent_band() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.calculate_delay(1).as_secs_f64();
            assert!(delay >= 1.5 && delay <= 2.5, "delay {delay} out of band");
        }
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn retry_state_tracks_attempts_and_resets() {
        let mut state = RetryState::new();
        state.record_attempt(Some("timeout".to_string()));
        state.record_attempt(Some("timeout".to_string()));
        assert_eq!(state.attempts, 2);
        state.reset();
        assert_eq!(state.attempts, 0);
        assert!(state.last_error.is_none());
    }
}
