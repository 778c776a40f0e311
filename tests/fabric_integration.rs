//! End-to-end scenarios exercised against the crate's public API, as opposed
//! to the inline unit tests that exercise private helpers directly.

use agent_fabric::prelude::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

struct FlakyTransport {
    fail_connect: Arc<AtomicBool>,
    fail_ping: Arc<AtomicBool>,
}

#[async_trait]
impl TransportHandle for FlakyTransport {
    async fn connect(&mut self) -> FabricResult<String> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(FabricError::ConnectionSetup { server: "x".into(), message: "down".into() });
        }
        Ok("session-1".to_string())
    }

    async fn ping(&self) -> FabricResult<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(FabricError::Transient { context: "ping".into(), message: "down".into() });
        }
        Ok(())
    }

    async fn close(&mut self) -> FabricResult<()> {
        Ok(())
    }
}

struct FlakyFactory {
    fail_connect: Arc<AtomicBool>,
    fail_ping: Arc<AtomicBool>,
}

impl TransportFactory for FlakyFactory {
    fn build(&self, _config: &MCPServerConfig) -> FabricResult<Box<dyn TransportHandle>> {
        Ok(Box::new(FlakyTransport { fail_connect: self.fail_connect.clone(), fail_ping: self.fail_ping.clone() }))
    }
}

fn flaky_manager(config: MCPConnectionManagerConfig) -> (MCPConnectionManager, Arc<AtomicBool>, Arc<AtomicBool>) {
    let fail_connect = Arc::new(AtomicBool::new(false));
    let fail_ping = Arc::new(AtomicBool::new(false));
    let mut transports = TransportRegistry::new();
    transports.register(
        Transport::Http,
        Arc::new(FlakyFactory { fail_connect: fail_connect.clone(), fail_ping: fail_ping.clone() }),
    );
    let manager = MCPConnectionManager::new(transports, CircuitRegistry::new(), config);
    (manager, fail_connect, fail_ping)
}

/// Spec scenario 1: CLOSED -> OPEN -> HALF_OPEN -> CLOSED, observed entirely
/// through the public breaker + monitor API (no direct helper calls).
#[tokio::test]
async fn breaker_trip_and_recover_observed_through_monitor() {
    let registry = CircuitRegistry::new();
    let breaker = registry.get_or_create(
        "svc",
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(80),
            call_timeout: None,
        },
    );
    let monitor = BreakerMonitor::new(registry.clone());
    let handle = monitor.start(1.0).expect("1.0s is within [1.0, 60.0]");

    // Let the monitor prime its last-observed state as Closed.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    for _ in 0..3 {
        let _: FabricResult<()> =
            breaker.execute(|| async { Err(FabricError::Transient { context: "t".into(), message: "boom".into() }) }).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Next monitor tick should observe the Closed -> Open transition.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // recovery_timeout has elapsed; a probe call closes the breaker.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let result: FabricResult<u32> = breaker.execute(|| async { Ok(7) }).await;
    assert!(result.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Next monitor tick should observe the Open -> Closed transition.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    monitor.stop();
    handle.abort();

    let events = monitor.recent_events(10);
    assert!(events.iter().any(|e| e.old_state == CircuitState::Closed && e.new_state == CircuitState::Open));
    assert!(events.iter().any(|e| e.old_state == CircuitState::Open && e.new_state == CircuitState::Closed));

    let alerts = monitor.recent_alerts(10);
    assert!(alerts.iter().any(|a| a.severity == AlertSeverity::High && a.message.contains("OPENED")));
}

/// Spec scenario 2: pool exhaustion drives every connection to the failed
/// queue and opens `mcp:<server>`; the background recovery loop (not a direct
/// call to a private helper) eventually repopulates the pool.
#[tokio::test]
async fn mcp_pool_exhaustion_recovers_through_background_loop() {
    let (manager, _fail_connect, fail_ping) = flaky_manager(MCPConnectionManagerConfig {
        max_connections_per_server: 3,
        min_connections_per_server: 3,
        recovery_interval: Duration::from_millis(50),
        health_check_interval: Duration::from_secs(3600),
        circuit_breaker_timeout: Duration::from_millis(50),
        max_recovery_attempts: 10,
    });

    let config = MCPServerConfig::new("x", "http://example", Transport::Http);
    manager.register_server(config).await.unwrap();
    assert_eq!(manager.status("x").unwrap().pool_available, 3);

    fail_ping.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        let conn = manager.get_connection("x").unwrap();
        manager.release(conn).await;
    }
    assert!(manager.get_connection("x").is_none());
    let status = manager.status("x").unwrap();
    assert_eq!(status.failed_connections, 3);
    assert_eq!(status.circuit_breaker_state, CircuitState::Open);

    // The background recovery loop creates fresh connections (connect only,
    // no ping), so it succeeds even though `fail_ping` is still set.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = manager.status("x").unwrap();
    assert_eq!(status.pool_available, 1);
    assert_eq!(status.failed_connections, 0);
    assert_eq!(status.circuit_breaker_state, CircuitState::Closed);

    manager.close_all().await;
}

/// Spec scenario 6 plus shutdown idempotence, at the public API level.
#[tokio::test]
async fn mcp_force_recovery_then_graceful_shutdown_is_idempotent() {
    let (manager, _fail_connect, fail_ping) = flaky_manager(MCPConnectionManagerConfig {
        max_connections_per_server: 3,
        min_connections_per_server: 3,
        recovery_interval: Duration::from_secs(10),
        health_check_interval: Duration::from_secs(10),
        circuit_breaker_timeout: Duration::from_secs(60),
        max_recovery_attempts: 10,
    });

    let config = MCPServerConfig::new("y", "http://example", Transport::Http);
    manager.register_server(config).await.unwrap();

    fail_ping.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        let conn = manager.get_connection("y").unwrap();
        manager.release(conn).await;
    }
    let status = manager.status("y").unwrap();
    assert_eq!(status.failed_connections, 3);
    assert_eq!(status.circuit_breaker_state, CircuitState::Open);

    let results = manager.force_recovery_all().await;
    assert_eq!(results.get("y"), Some(&true));

    let status = manager.status("y").unwrap();
    assert_eq!(status.circuit_breaker_state, CircuitState::Closed);
    assert_eq!(status.failed_connections, 0);

    manager.close_all().await;
    manager.close_all().await; // idempotent
}

struct RecordingManager {
    events: AsyncMutex<Vec<(String, String)>>, // (user_id, run_id)
}

#[async_trait]
impl WebSocketManager for RecordingManager {
    async fn notify_tool_completed(
        &self,
        user_id: &str,
        run_id: &str,
        _agent_name: &str,
        _tool_name: &str,
        _result: &str,
        _duration_ms: Option<u64>,
    ) -> FabricResult<()> {
        self.events.lock().await.push((user_id.to_string(), run_id.to_string()));
        Ok(())
    }
}

/// Spec scenario 4, exercised through the full registry -> session -> bridge
/// stack, including `set_websocket_manager`'s retroactive propagation into
/// sessions created before the manager was attached (§4.4).
#[tokio::test]
async fn registry_propagates_manager_and_isolates_users() {
    let registry = AgentRegistry::new();
    let session_a = registry.get_user_session("user-a").unwrap();
    let session_b = registry.get_user_session("user-b").unwrap();

    let manager = Arc::new(RecordingManager { events: AsyncMutex::new(Vec::new()) });
    registry.set_websocket_manager(manager.clone());

    session_a.bridge().tool_completed("run-a", "agent", "tool", "ok", None).await;
    session_b.bridge().tool_completed("run-b", "agent", "tool", "ok", None).await;

    assert!(!Arc::ptr_eq(&session_a, &session_b));
    assert!(!Arc::ptr_eq(&session_a.bridge(), &session_b.bridge()));

    let events = manager.events.lock().await;
    let a_runs: Vec<&str> = events.iter().filter(|(u, _)| u == "user-a").map(|(_, r)| r.as_str()).collect();
    let b_runs: Vec<&str> = events.iter().filter(|(u, _)| u == "user-b").map(|(_, r)| r.as_str()).collect();
    assert_eq!(a_runs, vec!["run-a"]);
    assert_eq!(b_runs, vec!["run-b"]);
}
