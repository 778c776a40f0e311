//! Process-wide directory of circuit breakers, keyed by dependency name.

use super::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Single process-wide instance shared by the Monitor, Metrics Collector, and
/// the MCP Connection Manager's per-server breakers (`mcp:<server>`).
#[derive(Clone, Default)]
pub struct CircuitRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent by name: the first caller's config wins, later callers get
    /// the existing breaker back unchanged.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        let mut guard = self.inner.lock().unwrap();
        guard
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name.to_string(), config))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    pub fn deregister(&self, name: &str) -> Option<CircuitBreaker> {
        self.inner.lock().unwrap().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    /// Per-breaker `{state, failure_count, success_rate, metrics}` as specified in §3.
    pub fn get_all_status(&self) -> Vec<CircuitStatus> {
        let guard = self.inner.lock().unwrap();
        let mut statuses: Vec<CircuitStatus> = guard.values().map(|b| b.get_status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent_by_name() {
        let registry = CircuitRegistry::new();
        let a = registry.get_or_create("svc", CircuitBreakerConfig::default());
        let b = registry.get_or_create("svc", CircuitBreakerConfig { failure_threshold: 99, ..Default::default() });
        a.force_open();
        assert_eq!(b.state(), a.state(), "same underlying breaker");
    }

    #[test]
    fn get_all_status_is_sorted_by_name() {
        let registry = CircuitRegistry::new();
        registry.get_or_create("zeta", CircuitBreakerConfig::default());
        registry.get_or_create("alpha", CircuitBreakerConfig::default());
        let statuses = registry.get_all_status();
        assert_eq!(statuses[0].name, "alpha");
        assert_eq!(statuses[1].name, "zeta");
    }
}
