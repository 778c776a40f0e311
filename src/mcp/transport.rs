//! The external collaborator interface consumed by the connection manager:
//! a transport factory keyed by [`Transport`] kind.

use crate::error::{FabricError, FabricResult};
use crate::mcp::config::{MCPServerConfig, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A live (or connecting) handle to one MCP server, as produced by a
/// [`TransportFactory`]. Implementations are supplied by the host
/// application; this crate only specifies the shape.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Connect and negotiate, returning a session id.
    async fn connect(&mut self) -> FabricResult<String>;
    /// Cheap liveness probe. Must not assume `connect` was already called.
    async fn ping(&self) -> FabricResult<()>;
    /// Best-effort close; errors are logged by the caller, never propagated.
    async fn close(&mut self) -> FabricResult<()>;
}

/// Builds a [`TransportHandle`] for a given server config.
pub trait TransportFactory: Send + Sync {
    fn build(&self, config: &MCPServerConfig) -> FabricResult<Box<dyn TransportHandle>>;
}

/// Maps [`Transport`] kinds to their factory, as required by §4.3.2 step 2.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<Transport, Arc<dyn TransportFactory>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transport: Transport, factory: Arc<dyn TransportFactory>) {
        self.factories.insert(transport, factory);
    }

    pub fn build(&self, config: &MCPServerConfig) -> FabricResult<Box<dyn TransportHandle>> {
        self.factories
            .get(&config.transport)
            .ok_or(FabricError::UnsupportedTransport(config.transport))?
            .build(config)
    }
}
