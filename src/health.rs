//! §6: health categorization across a set of breakers, and the circuit
//! name → dependency-kind classification used by service dashboards.

use crate::circuit::{CircuitState, CircuitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCategory {
    Healthy,
    Degraded,
    Recovering,
    Unhealthy,
    Unknown,
}

/// A breaker's individual standing, folded into the aggregate by
/// [`categorize_health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerHealth {
    Healthy,
    Recovering,
    Unhealthy,
}

fn breaker_health(status: &CircuitStatus) -> BreakerHealth {
    match status.state {
        CircuitState::Closed => BreakerHealth::Healthy,
        CircuitState::HalfOpen => BreakerHealth::Recovering,
        CircuitState::Open => BreakerHealth::Unhealthy,
    }
}

/// Rules (§6): all healthy → healthy; any unhealthy → unhealthy; else any
/// recovering → recovering; non-empty with mixed/unknown → degraded;
/// empty → unknown.
pub fn categorize_health(statuses: &[CircuitStatus]) -> HealthCategory {
    if statuses.is_empty() {
        return HealthCategory::Unknown;
    }
    let healths: Vec<BreakerHealth> = statuses.iter().map(breaker_health).collect();
    if healths.iter().all(|h| *h == BreakerHealth::Healthy) {
        return HealthCategory::Healthy;
    }
    if healths.iter().any(|h| *h == BreakerHealth::Unhealthy) {
        return HealthCategory::Unhealthy;
    }
    if healths.iter().any(|h| *h == BreakerHealth::Recovering) {
        return HealthCategory::Recovering;
    }
    HealthCategory::Degraded
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Llm,
    Database,
    ExternalApi,
    Other,
}

/// Keyword rules (§6), checked in the order the spec lists them.
pub fn classify_circuit_name(name: &str) -> DependencyKind {
    let lower = name.to_ascii_lowercase();
    if lower.contains("llm") {
        DependencyKind::Llm
    } else if lower.contains("postgres") || lower.contains("clickhouse") || lower.contains("db_") {
        DependencyKind::Database
    } else if lower.contains("http_") || lower.contains("api") || lower.contains("google") || lower.contains("openai")
    {
        DependencyKind::ExternalApi
    } else {
        DependencyKind::Other
    }
}
