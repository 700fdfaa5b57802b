use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};

/// Get-or-create access to named breakers sharing one default configuration.
///
/// The registry is an explicitly constructed value owned by the composing
/// application - never a process-wide singleton - so tests and independent
/// pipelines each hold their own.
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers share the given defaults.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for a service, creating it on first access.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        // A writer may have raced us here; keep whichever landed first.
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(breaker = name, "creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, self.defaults.clone()))
            })
            .clone()
    }

    /// Get an existing breaker without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Force every registered breaker back to closed.
    pub fn reset_all(&self) {
        let breakers = self.breakers.read();
        for breaker in breakers.values() {
            breaker.reset();
        }
        info!(count = breakers.len(), "reset all circuit breakers");
    }

    /// Stats for every registered breaker, keyed by name.
    pub fn all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    /// Names of all registered breakers.
    pub fn names(&self) -> Vec<String> {
        self.breakers.read().keys().cloned().collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;

    #[test]
    fn get_or_create_returns_same_instance() {
        let registry = CircuitBreakerRegistry::default();
        let first = registry.get_or_create("meta-api");
        let second = registry.get_or_create("meta-api");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn get_does_not_create() {
        let registry = CircuitBreakerRegistry::default();
        assert!(registry.get("unknown").is_none());
        registry.get_or_create("stripe-api");
        assert!(registry.get("stripe-api").is_some());
    }

    #[test]
    fn reset_all_closes_tripped_breakers() {
        let registry = CircuitBreakerRegistry::default();
        registry.get_or_create("meta-api").trip();
        registry.get_or_create("tiktok-api").trip();

        registry.reset_all();

        let stats = registry.all_stats();
        assert_eq!(stats.len(), 2);
        assert!(stats.values().all(|s| s.state == CircuitState::Closed));
    }
}
