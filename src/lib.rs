#![forbid(unsafe_code)]

//! # Agent Fabric
//!
//! Resilience & isolation fabric for a multi-tenant AI agent platform:
//! per-dependency circuit breakers, a live breaker monitor with derived
//! alerts and metrics, a self-healing pooled connection manager for external
//! MCP servers, and per-user execution sessions that stream five ordered
//! lifecycle events over isolated WebSocket bridges.
//!
//! ## Quick start
//!
//! ```rust
//! use agent_fabric::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = CircuitRegistry::new();
//!     let breaker = registry.get_or_create("llm_gateway", CircuitBreakerConfig::default());
//!
//!     let result: FabricResult<u32> = breaker.execute(|| async { Ok(42) }).await;
//!     assert_eq!(result.unwrap(), 42);
//!
//!     let monitor = BreakerMonitor::new(registry);
//!     let _handle = monitor.start(5.0).expect("valid interval");
//!     monitor.stop();
//! }
//! ```

mod backoff;
mod circuit;
mod clock;
mod error;
mod health;
mod mcp;
mod monitor;
mod session;

pub use backoff::Backoff;
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState, CircuitStatus};
pub use clock::{Clock, MonotonicClock};
pub use error::{FabricError, FabricResult};
pub use health::{categorize_health, classify_circuit_name, DependencyKind, HealthCategory};
pub use mcp::{
    ConnectionMetrics, ConnectionStatus, HealthStatus as McpHealthStatus, MCPConnection, MCPConnectionManager,
    MCPConnectionManagerConfig, MCPServerConfig, ServerStatus, Transport, TransportFactory, TransportHandle,
    TransportRegistry,
};
pub use monitor::{
    AggregatedMetrics, Alert, AlertHandler, AlertSeverity, BoundedRing, BreakerMonitor, MetricSample,
    MetricsCollector, StateChangeEvent, SyncAlertHandler,
};
pub use session::{
    Agent, AgentFactory, AgentRegistry, EmitLifecycleEvent, FactoryIntegrationStatus, RegistryHealth,
    SsotComplianceStatus, ToolDispatcher, ToolDispatcherFactory, UserAgentSession, UserContext, WebSocketBridge,
    WebSocketManager,
};

pub mod prelude;
