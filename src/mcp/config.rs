//! Immutable server configuration for the MCP connection manager.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Stdio,
    Http,
    WebSocket,
}

/// Immutable after registration with [`super::manager::MCPConnectionManager`].
#[derive(Debug, Clone)]
pub struct MCPServerConfig {
    pub name: String,
    pub url: String,
    pub transport: Transport,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub auth: Option<String>,
}

impl MCPServerConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            transport,
            timeout_ms: 30_000,
            max_retries: 3,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }
}
