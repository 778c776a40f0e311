//! A pooled connection to one MCP server and its per-server metrics.

use super::transport::TransportHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Disconnected,
}

/// Ownership is exclusive: a connection lives in exactly one of the pool, a
/// caller's hand, or the failed-connections recovery queue. It is never
/// silently dropped (§4.3, "no permanent abandonment").
pub struct MCPConnection {
    pub id: Uuid,
    pub server_name: String,
    pub transport: Box<dyn TransportHandle>,
    pub status: ConnectionStatus,
    pub created_at: Instant,
    pub last_used: Instant,
    pub session_id: Option<String>,
    pub retry_count: u32,
    pub last_failure: Option<Instant>,
    pub consecutive_failures: u32,
    pub recovery_backoff_delay: Duration,
    pub max_recovery_attempts: u32,
}

impl MCPConnection {
    pub fn new(server_name: impl Into<String>, transport: Box<dyn TransportHandle>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            server_name: server_name.into(),
            transport,
            status: ConnectionStatus::Connecting,
            created_at: now,
            last_used: now,
            session_id: None,
            retry_count: 0,
            last_failure: None,
            consecutive_failures: 0,
            recovery_backoff_delay: Duration::from_secs(1),
            max_recovery_attempts: 10,
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionMetrics {
    pub active: usize,
    pub idle: usize,
    pub failed: usize,
    pub total_created: u64,
    pub total_destroyed: u64,
    pub recovery_attempts: u64,
    pub successful_recoveries: u64,
    pub circuit_breaker_open: bool,
    pub last_circuit_open: Option<Instant>,
}
