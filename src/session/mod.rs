//! Components F/G/H: per-user execution sessions, the factory-backed
//! registry, and the WebSocket lifecycle bridge.

mod agent;
mod bridge;
mod context;
mod dispatcher;
mod registry;

pub use agent::Agent;
pub use bridge::{EmitLifecycleEvent, WebSocketBridge, WebSocketManager};
pub use context::UserContext;
pub use dispatcher::{ToolDispatcher, ToolDispatcherFactory};
pub use registry::{
    AgentFactory, AgentRegistry, FactoryIntegrationStatus, RegistryHealth, SsotComplianceStatus, UserAgentSession,
};
