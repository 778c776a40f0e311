//! Component A/B: the per-dependency circuit breaker and its process-wide registry.

mod breaker;
mod registry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use registry::CircuitRegistry;
