//! Component E: the hardest subsystem — a per-server bounded connection pool
//! with health checks, exponential backoff with reset, and a recovery loop
//! that never permanently abandons a failed connection.

use super::config::MCPServerConfig;
use super::connection::{ConnectionMetrics, ConnectionStatus, MCPConnection};
use super::transport::TransportRegistry;
use crate::backoff::Backoff;
use crate::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState};
use crate::error::{FabricError, FabricResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const RECOVERY_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// §4.3.6: doubling backoff starting at 1s, capped at 60s. `retry_count + 1`
/// is passed as the attempt number so the Nth failed recovery attempt yields
/// the Nth doubling (1s, 2s, 4s, ... capped).
fn recovery_backoff() -> Backoff {
    Backoff::exponential(Duration::from_secs(1)).with_max(RECOVERY_BACKOFF_CAP)
}

#[derive(Debug, Clone)]
pub struct MCPConnectionManagerConfig {
    pub max_connections_per_server: usize,
    pub min_connections_per_server: usize,
    pub recovery_interval: Duration,
    pub health_check_interval: Duration,
    pub circuit_breaker_timeout: Duration,
    pub max_recovery_attempts: u32,
}

impl Default for MCPConnectionManagerConfig {
    fn default() -> Self {
        Self {
            max_connections_per_server: 10,
            min_connections_per_server: 1,
            recovery_interval: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            circuit_breaker_timeout: Duration::from_secs(60),
            max_recovery_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub server_config: MCPServerConfig,
    pub pool_available: usize,
    pub pool_capacity: usize,
    pub failed_connections: usize,
    pub metrics: ConnectionMetrics,
    pub circuit_breaker_state: CircuitState,
    pub health_status: HealthStatus,
}

struct ServerState {
    config: MCPServerConfig,
    pool: Mutex<VecDeque<MCPConnection>>,
    failed: Mutex<VecDeque<MCPConnection>>,
    metrics: Mutex<ConnectionMetrics>,
    breaker: CircuitBreaker,
}

struct ManagerInner {
    servers: Mutex<HashMap<String, Arc<ServerState>>>,
    transports: TransportRegistry,
    registry: CircuitRegistry,
    config: MCPConnectionManagerConfig,
    shutdown: AtomicBool,
    loops_started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns one bounded pool per registered MCP server.
///
/// Cheap to clone: every mutable field lives behind `Arc`, so cloning hands
/// out another handle to the same pools (needed so background loops can hold
/// their own handle).
#[derive(Clone)]
pub struct MCPConnectionManager {
    inner: Arc<ManagerInner>,
}

impl MCPConnectionManager {
    pub fn new(transports: TransportRegistry, registry: CircuitRegistry, config: MCPConnectionManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                servers: Mutex::new(HashMap::new()),
                transports,
                registry,
                config,
                shutdown: AtomicBool::new(false),
                loops_started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn ensure_server_state(&self, config: MCPServerConfig) -> Arc<ServerState> {
        let mut servers = self.inner.servers.lock().unwrap();
        servers
            .entry(config.name.clone())
            .or_insert_with(|| {
                let breaker = self
                    .inner
                    .registry
                    .get_or_create(&format!("mcp:{}", config.name), CircuitBreakerConfig::default());
                Arc::new(ServerState {
                    config,
                    pool: Mutex::new(VecDeque::new()),
                    failed: Mutex::new(VecDeque::new()),
                    metrics: Mutex::new(ConnectionMetrics::default()),
                    breaker,
                })
            })
            .clone()
    }

    fn server_state(&self, name: &str) -> Option<Arc<ServerState>> {
        self.inner.servers.lock().unwrap().get(name).cloned()
    }

    /// Register a server, seed its pool toward `min_connections_per_server`,
    /// and start the shared health/recovery loops on first use.
    pub async fn register_server(&self, config: MCPServerConfig) -> FabricResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(FabricError::ShutdownInProgress);
        }
        let name = config.name.clone();
        self.ensure_server_state(config.clone());
        self.start_background_loops();
        for _ in 0..self.inner.config.min_connections_per_server {
            match self.create_connection(config.clone()).await {
                Ok(conn) => self.push_to_pool(&name, conn),
                Err(err) => tracing::error!(server = %name, error = %err, "initial connection failed"),
            }
        }
        Ok(())
    }

    /// §4.3.2: build a transport, connect it, and negotiate a session.
    pub async fn create_connection(&self, config: MCPServerConfig) -> FabricResult<MCPConnection> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(FabricError::ShutdownInProgress);
        }
        let state = self.ensure_server_state(config.clone());
        let transport = self.inner.transports.build(&config)?;
        let mut conn = MCPConnection::new(config.name.clone(), transport);
        conn.max_recovery_attempts = self.inner.config.max_recovery_attempts;

        match conn.transport.connect().await {
            Ok(session_id) => {
                conn.status = ConnectionStatus::Connected;
                conn.session_id = Some(session_id);
                conn.retry_count = 0;
                conn.consecutive_failures = 0;
                conn.touch();
                state.metrics.lock().unwrap().total_created += 1;
                Ok(conn)
            }
            Err(err) => {
                conn.status = ConnectionStatus::Failed;
                Err(FabricError::ConnectionSetup { server: config.name, message: err.to_string() })
            }
        }
    }

    fn push_to_pool(&self, server: &str, conn: MCPConnection) {
        if let Some(state) = self.server_state(server) {
            let mut pool = state.pool.lock().unwrap();
            if pool.len() < self.inner.config.max_connections_per_server {
                pool.push_back(conn);
            }
        }
    }

    /// §4.3.3: pop non-blockingly; `None` if the pool is empty.
    pub fn get_connection(&self, server: &str) -> Option<MCPConnection> {
        let state = self.server_state(server)?;
        let mut conn = state.pool.lock().unwrap().pop_front()?;
        conn.touch();
        Some(conn)
    }

    /// §4.3.3/4.3.4: re-validate before returning to the pool.
    pub async fn release(&self, conn: MCPConnection) {
        let server = conn.server_name.clone();
        let healthy = self.health_check(&conn).await;
        if healthy {
            self.push_to_pool(&server, conn);
        } else {
            self.handle_failure(conn).await;
        }
    }

    /// Must not hold pool locks across I/O; caller already released any lock
    /// before calling this.
    async fn health_check(&self, conn: &MCPConnection) -> bool {
        if conn.status != ConnectionStatus::Connected {
            return false;
        }
        match conn.transport.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(server = %conn.server_name, error = %err, "health check failed");
                false
            }
        }
    }

    /// §4.3.5: no permanent abandonment — the connection always ends up in
    /// the failed queue, never dropped.
    async fn handle_failure(&self, mut conn: MCPConnection) {
        let server = conn.server_name.clone();
        if let Err(err) = conn.transport.close().await {
            tracing::error!(server = %server, error = %err, "error closing failed connection");
        }
        conn.status = ConnectionStatus::Failed;
        conn.consecutive_failures += 1;
        conn.last_failure = Some(Instant::now());

        let Some(state) = self.server_state(&server) else { return };
        state.metrics.lock().unwrap().total_destroyed += 1;
        state.breaker.record_external_failure();
        if state.breaker.state() == CircuitState::Open {
            let mut metrics = state.metrics.lock().unwrap();
            metrics.circuit_breaker_open = true;
            metrics.last_circuit_open = Some(Instant::now());
        }
        state.failed.lock().unwrap().push_back(conn);
    }

    /// §4.3.6: pick the oldest failed connection past its backoff and retry
    /// it; apply the doubling-with-cap-and-reset rules on the outcome.
    async fn try_recover_one(&self, name: &str) -> bool {
        let Some(state) = self.server_state(name) else { return false };
        let candidate = {
            let mut failed = state.failed.lock().unwrap();
            let idx = failed.iter().position(|c| {
                c.last_failure.map(|t| t.elapsed() >= c.recovery_backoff_delay).unwrap_or(true)
            });
            idx.and_then(|i| failed.remove(i))
        };
        let Some(mut candidate) = candidate else { return false };

        match self.create_connection(state.config.clone()).await {
            Ok(new_conn) => {
                self.push_to_pool(name, new_conn);
                state.breaker.reset();
                state.failed.lock().unwrap().clear();
                let mut metrics = state.metrics.lock().unwrap();
                metrics.successful_recoveries += 1;
                metrics.circuit_breaker_open = false;
                true
            }
            Err(_) => {
                candidate.retry_count += 1;
                if candidate.retry_count >= candidate.max_recovery_attempts {
                    candidate.retry_count = 0;
                    candidate.recovery_backoff_delay = RECOVERY_BACKOFF_CAP;
                } else {
                    candidate.recovery_backoff_delay =
                        recovery_backoff().delay(candidate.retry_count as usize + 1);
                }
                candidate.last_failure = Some(Instant::now());
                state.metrics.lock().unwrap().recovery_attempts += 1;
                state.failed.lock().unwrap().push_back(candidate);
                false
            }
        }
    }

    async fn recovery_pass(&self) {
        let names: Vec<String> = self.inner.servers.lock().unwrap().keys().cloned().collect();
        for name in names {
            let Some(state) = self.server_state(&name) else { continue };
            if state.failed.lock().unwrap().is_empty() {
                continue;
            }
            if state.breaker.state() == CircuitState::Open
                && state.breaker.last_failure_elapsed() < self.inner.config.circuit_breaker_timeout
            {
                continue;
            }
            self.try_recover_one(&name).await;
        }
    }

    async fn health_pass(&self) {
        let names: Vec<String> = self.inner.servers.lock().unwrap().keys().cloned().collect();
        for name in names {
            let Some(state) = self.server_state(&name) else { continue };
            let pooled: Vec<MCPConnection> = state.pool.lock().unwrap().drain(..).collect();
            let mut still_healthy = Vec::new();
            for conn in pooled {
                if self.health_check(&conn).await {
                    still_healthy.push(conn);
                } else {
                    self.handle_failure(conn).await;
                }
            }
            state.pool.lock().unwrap().extend(still_healthy);

            let deficit = {
                let pool = state.pool.lock().unwrap();
                self.inner.config.min_connections_per_server.saturating_sub(pool.len())
            };
            for _ in 0..deficit {
                match self.create_connection(state.config.clone()).await {
                    Ok(conn) => self.push_to_pool(&name, conn),
                    Err(err) => tracing::error!(server = %name, error = %err, "pool top-up failed"),
                }
            }

            let (pool_empty, has_failed) = {
                (state.pool.lock().unwrap().is_empty(), !state.failed.lock().unwrap().is_empty())
            };
            if pool_empty && has_failed {
                self.try_recover_one(&name).await;
            }
        }
    }

    /// §4.3.9: reset every failed connection's backoff/breaker and retry once.
    pub async fn force_recovery_all(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self.inner.servers.lock().unwrap().keys().cloned().collect();
        let mut results = HashMap::new();
        for name in names {
            let Some(state) = self.server_state(&name) else { continue };
            {
                let mut failed = state.failed.lock().unwrap();
                for conn in failed.iter_mut() {
                    conn.recovery_backoff_delay = Duration::from_secs(1);
                    conn.retry_count = 0;
                }
            }
            state.breaker.reset();
            let had_failed = !state.failed.lock().unwrap().is_empty();
            let ok = if had_failed { self.try_recover_one(&name).await } else { true };
            results.insert(name, ok);
        }
        results
    }

    fn start_background_loops(&self) {
        if self.inner.loops_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let recovery_mgr = self.clone();
        let health_mgr = self.clone();
        let recovery_interval = self.inner.config.recovery_interval;
        let health_interval = self.inner.config.health_check_interval;

        let recovery_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(recovery_interval);
            loop {
                ticker.tick().await;
                if recovery_mgr.inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                recovery_mgr.recovery_pass().await;
            }
        });
        let health_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            loop {
                ticker.tick().await;
                if health_mgr.inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                health_mgr.health_pass().await;
            }
        });
        self.inner.tasks.lock().unwrap().push(recovery_handle);
        self.inner.tasks.lock().unwrap().push(health_handle);
    }

    /// §4.3.10: stop accepting work, force-cancel loops past a 5s grace
    /// period, and drain/close every connection. Idempotent.
    pub async fn close_all(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock().unwrap());
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                abort.abort();
            }
        }

        let names: Vec<String> = self.inner.servers.lock().unwrap().keys().cloned().collect();
        for name in names {
            let Some(state) = self.server_state(&name) else { continue };
            let pooled: Vec<MCPConnection> = state.pool.lock().unwrap().drain(..).collect();
            let failed: Vec<MCPConnection> = state.failed.lock().unwrap().drain(..).collect();
            for mut conn in pooled.into_iter().chain(failed.into_iter()) {
                if let Err(err) = conn.transport.close().await {
                    tracing::error!(server = %name, error = %err, "error closing connection during shutdown");
                }
            }
            self.inner.registry.deregister(&format!("mcp:{name}"));
        }
    }

    pub fn status(&self, name: &str) -> Option<ServerStatus> {
        let state = self.server_state(name)?;
        let pool_len = state.pool.lock().unwrap().len();
        let failed_len = state.failed.lock().unwrap().len();
        let breaker_state = state.breaker.state();
        let health_status = if pool_len > 0 && breaker_state == CircuitState::Closed {
            HealthStatus::Healthy
        } else if pool_len > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Failed
        };
        let metrics = state.metrics.lock().unwrap().clone();
        Some(ServerStatus {
            server_config: state.config.clone(),
            pool_available: pool_len,
            pool_capacity: self.inner.config.max_connections_per_server,
            failed_connections: failed_len,
            metrics,
            circuit_breaker_state: breaker_state,
            health_status,
        })
    }

    pub fn status_all(&self) -> HashMap<String, ServerStatus> {
        let names: Vec<String> = self.inner.servers.lock().unwrap().keys().cloned().collect();
        names.into_iter().filter_map(|n| self.status(&n).map(|s| (n, s))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::Transport;
    use crate::mcp::transport::test_support::{ScriptedFactory, ScriptedTransport};
    use crate::mcp::transport::TransportHandle;
    use std::sync::atomic::{AtomicBool as Flag, AtomicUsize, Ordering as O};

    fn manager_with(fail_connect: bool, fail_ping: bool) -> (MCPConnectionManager, Arc<Flag>, Arc<Flag>) {
        let should_fail_connect = Arc::new(Flag::new(fail_connect));
        let should_fail_ping = Arc::new(Flag::new(fail_ping));
        let ping_calls = Arc::new(AtomicUsize::new(0));
        let mut transports = TransportRegistry::new();
        transports.register(
            Transport::Http,
            Arc::new(ScriptedFactory {
                should_fail_connect: should_fail_connect.clone(),
                should_fail_ping: should_fail_ping.clone(),
                ping_calls,
            }),
        );
        let manager = MCPConnectionManager::new(
            transports,
            CircuitRegistry::new(),
            MCPConnectionManagerConfig { max_connections_per_server: 3, min_connections_per_server: 0, ..Default::default() },
        );
        (manager, should_fail_connect, should_fail_ping)
    }

    fn cfg(name: &str) -> MCPServerConfig {
        MCPServerConfig::new(name, "http://example", Transport::Http)
    }

    #[tokio::test]
    async fn create_connection_marks_connected() {
        let (manager, _, _) = manager_with(false, false);
        let conn = manager.create_connection(cfg("x")).await.unwrap();
        assert_eq!(conn.status, ConnectionStatus::Connected);
        assert!(conn.session_id.is_some());
    }

    #[tokio::test]
    async fn unsupported_transport_errors() {
        let (manager, _, _) = manager_with(false, false);
        let err = manager.create_connection(MCPServerConfig::new("x", "ws://x", Transport::WebSocket)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn release_routes_unhealthy_connection_to_failed_queue() {
        let (manager, _, should_fail_ping) = manager_with(false, false);
        let conn = manager.create_connection(cfg("x")).await.unwrap();
        should_fail_ping.store(true, O::SeqCst);
        manager.release(conn).await;
        let status = manager.status("x").unwrap();
        assert_eq!(status.pool_available, 0);
        assert_eq!(status.failed_connections, 1);
    }

    #[tokio::test]
    async fn pool_exhaustion_with_recovery_scenario() {
        let (manager, _, should_fail_ping) = manager_with(false, false);
        for _ in 0..3 {
            let conn = manager.create_connection(cfg("x")).await.unwrap();
            manager.push_to_pool("x", conn);
        }
        // All three report failure.
        should_fail_ping.store(true, O::SeqCst);
        for _ in 0..3 {
            let conn = manager.get_connection("x").unwrap();
            manager.release(conn).await;
        }
        assert!(manager.get_connection("x").is_none());
        let status = manager.status("x").unwrap();
        assert_eq!(status.failed_connections, 3);
        assert_eq!(status.circuit_breaker_state, CircuitState::Open);

        // Recovery succeeds once pinging works again.
        should_fail_ping.store(false, O::SeqCst);
        let state = manager.server_state("x").unwrap();
        state.breaker.reset(); // simulate circuit_breaker_timeout elapsed
        manager.try_recover_one("x").await;

        let status = manager.status("x").unwrap();
        assert_eq!(status.pool_available, 1);
        assert_eq!(status.failed_connections, 0);
    }

    #[tokio::test]
    async fn backoff_reset_scenario() {
        let (manager, should_fail_connect, _) = manager_with(false, false);
        let conn = manager.create_connection(cfg("x")).await.unwrap();
        manager.handle_failure(conn).await;

        should_fail_connect.store(true, O::SeqCst);
        for _ in 0..4 {
            manager.try_recover_one("x").await;
        }
        let delay_before_success = {
            let state = manager.server_state("x").unwrap();
            let delay = state.failed.lock().unwrap().front().unwrap().recovery_backoff_delay;
            delay
        };
        assert_eq!(delay_before_success, Duration::from_secs(16));

        should_fail_connect.store(false, O::SeqCst);
        let recovered = manager.try_recover_one("x").await;
        assert!(recovered);

        // A fresh failure afterward should start backoff at 1s again.
        let fresh = manager.get_connection("x").unwrap();
        manager.handle_failure(fresh).await;
        let state = manager.server_state("x").unwrap();
        let delay = state.failed.lock().unwrap().front().unwrap().recovery_backoff_delay;
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn force_recovery_all_resets_breaker_and_backoff() {
        let (manager, should_fail_connect, _) = manager_with(true, false);
        manager.ensure_server_state(cfg("y"));
        let state = manager.server_state("y").unwrap();
        for _ in 0..3 {
            let transport: Box<dyn TransportHandle> = Box::new(ScriptedTransport {
                should_fail_connect: Arc::new(Flag::new(false)),
                should_fail_ping: Arc::new(Flag::new(false)),
                ping_calls: Arc::new(AtomicUsize::new(0)),
            });
            let mut conn = MCPConnection::new("y", transport);
            conn.recovery_backoff_delay = Duration::from_secs(32);
            conn.last_failure = Some(Instant::now());
            state.failed.lock().unwrap().push_back(conn);
        }
        state.breaker.force_open();
        assert_eq!(state.breaker.state(), CircuitState::Open);

        should_fail_connect.store(false, O::SeqCst);
        let results = manager.force_recovery_all().await;

        assert_eq!(results.get("y"), Some(&true));
        assert_eq!(state.breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn close_all_is_idempotent() {
        let (manager, _, _) = manager_with(false, false);
        manager.register_server(cfg("x")).await.unwrap();
        manager.close_all().await;
        manager.close_all().await;
    }
}
