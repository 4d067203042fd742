//! In-memory dispatch idempotency fast path.
//!
//! Ported from `original_source` `services/execution/idempotency.py`: a
//! `(execution_id, dispatch_id) -> first_seen_at` map, guarded by a single
//! lock, pruned lazily on insert rather than by a background sweep. This
//! map is a performance optimization only — the persisted `kinds::
//! DISPATCH_KEY` rows `NodeDispatcher::persist` writes through `Store` are
//! authoritative across restarts, since this map is empty again the moment
//! the process restarts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Tracks dispatch keys claimed in this process's lifetime.
pub struct DispatchRegistry {
    entries: Mutex<HashMap<(String, String), Instant>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Claims `(execution_id, dispatch_id)`. Returns `true` if this call
    /// claimed it (first sighting, or the prior claim has aged out past
    /// the TTL), `false` if another live claim already holds it.
    pub fn register(&self, execution_id: &str, dispatch_id: &str) -> bool {
        let key = (execution_id.to_string(), dispatch_id.to_string());
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("dispatch registry lock poisoned");

        entries.retain(|_, seen_at| now.saturating_duration_since(*seen_at) < IDEMPOTENCY_TTL);

        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, now);
        true
    }

    pub fn clear(&self) {
        self.entries.lock().expect("dispatch registry lock poisoned").clear();
    }
}

impl Default for DispatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_succeeds_second_is_rejected() {
        let registry = DispatchRegistry::new();
        assert!(registry.register("exec-1", "dispatch-1"));
        assert!(!registry.register("exec-1", "dispatch-1"));
    }

    #[test]
    fn distinct_execution_ids_do_not_collide() {
        let registry = DispatchRegistry::new();
        assert!(registry.register("exec-1", "dispatch-1"));
        assert!(registry.register("exec-2", "dispatch-1"));
    }

    #[test]
    fn clear_releases_all_claims() {
        let registry = DispatchRegistry::new();
        registry.register("exec-1", "dispatch-1");
        registry.clear();
        assert!(registry.register("exec-1", "dispatch-1"));
    }
}
