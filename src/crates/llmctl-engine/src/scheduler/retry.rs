//! Scheduler-level retry backoff: 3 attempts total, 0.5s/2s/8s base delay,
//! ±25% jitter — spec.md §7's own schedule, distinct from
//! `llmctl-engine::router`'s single same-provider retry.
//!
//! Grounded on `orchestrator::executor::retry::RetryConfig::backoff_delay`'s
//! shape (exponential base times multiplier, then jitter), but fixed to
//! spec's three literal delays rather than computed from a multiplier,
//! since spec.md pins the exact schedule instead of leaving it
//! configurable.

use std::time::Duration;

use rand::Rng;

/// Total dispatch attempts a node run gets before the scheduler gives up
/// and fails the run (first attempt plus two retries).
pub const MAX_ATTEMPTS: u32 = 3;

const BASE_DELAYS_MS: [u64; 3] = [500, 2000, 8000];

/// Backoff delay for a zero-based attempt index. Attempt `0` (the first
/// retry, after the initial try failed) waits ~0.5s, attempt `1` ~2s,
/// attempt `2` and beyond clamp to the last configured delay.
pub fn backoff_with_jitter(attempt: usize) -> Duration {
    let base = BASE_DELAYS_MS[attempt.min(BASE_DELAYS_MS.len() - 1)] as f64;
    let jitter_span = base * 0.25;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    Duration::from_millis((base + jitter).max(0.0) as u64)
}
