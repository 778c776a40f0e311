//! Component E: a pooled, self-healing connection manager for MCP servers.

mod config;
mod connection;
mod manager;
mod transport;

pub use config::{MCPServerConfig, Transport};
pub use connection::{ConnectionMetrics, ConnectionStatus, MCPConnection};
pub use manager::{HealthStatus, MCPConnectionManager, MCPConnectionManagerConfig, ServerStatus};
pub use transport::{TransportFactory, TransportHandle, TransportRegistry};
