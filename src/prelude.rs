//! Convenient re-exports for common Agent Fabric types.
pub use crate::{
    Agent, AgentFactory, AgentRegistry, AlertHandler, AlertSeverity, Backoff, BreakerMonitor, CircuitBreaker,
    CircuitBreakerConfig, CircuitRegistry, CircuitState, Clock, EmitLifecycleEvent, FabricError, FabricResult,
    MCPConnectionManager, MCPConnectionManagerConfig, MCPServerConfig, MetricsCollector, MonotonicClock,
    ToolDispatcher, ToolDispatcherFactory, Transport, TransportFactory, TransportHandle, TransportRegistry,
    UserAgentSession, UserContext, WebSocketBridge, WebSocketManager,
};
