//! Component H: per-user WebSocket bridge implementing the five lifecycle
//! events (§4.5), with graceful degradation when the underlying manager
//! doesn't implement one.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as SendLock;

use crate::error::{FabricError, FabricResult};

/// Capability interface consumed from outside the fabric (§6). Any subset of
/// these may be implemented; the default for each is "unsupported", letting
/// the bridge detect absence without runtime reflection.
#[async_trait]
pub trait WebSocketManager: Send + Sync {
    async fn notify_agent_started(&self, _user_id: &str, _run_id: &str, _agent_name: &str) -> FabricResult<()> {
        Err(FabricError::NotFound("notify_agent_started".into()))
    }

    async fn notify_agent_thinking(
        &self,
        _user_id: &str,
        _run_id: &str,
        _agent_name: &str,
        _reasoning: &str,
        _step_number: Option<u32>,
        _progress_percentage: Option<f64>,
    ) -> FabricResult<()> {
        Err(FabricError::NotFound("notify_agent_thinking".into()))
    }

    async fn notify_tool_executing(
        &self,
        _user_id: &str,
        _run_id: &str,
        _agent_name: &str,
        _tool_name: &str,
        _parameters: &str,
    ) -> FabricResult<()> {
        Err(FabricError::NotFound("notify_tool_executing".into()))
    }

    async fn notify_tool_completed(
        &self,
        _user_id: &str,
        _run_id: &str,
        _agent_name: &str,
        _tool_name: &str,
        _result: &str,
        _duration_ms: Option<u64>,
    ) -> FabricResult<()> {
        Err(FabricError::NotFound("notify_tool_completed".into()))
    }

    async fn notify_agent_completed(
        &self,
        _user_id: &str,
        _run_id: &str,
        _agent_name: &str,
        _result: &str,
        _execution_time_ms: Option<u64>,
    ) -> FabricResult<()> {
        Err(FabricError::NotFound("notify_agent_completed".into()))
    }
}

/// What agents actually depend on (§9: "capability interface, not a base
/// class"). Implemented by [`WebSocketBridge`]; agent code never touches a
/// [`WebSocketManager`] directly.
#[async_trait]
pub trait EmitLifecycleEvent: Send + Sync {
    async fn agent_started(&self, run_id: &str, agent_name: &str);
    async fn agent_thinking(
        &self,
        run_id: &str,
        agent_name: &str,
        reasoning: &str,
        step_number: Option<u32>,
        progress_percentage: Option<f64>,
    );
    async fn tool_executing(&self, run_id: &str, agent_name: &str, tool_name: &str, parameters: &str);
    async fn tool_completed(
        &self,
        run_id: &str,
        agent_name: &str,
        tool_name: &str,
        result: &str,
        duration_ms: Option<u64>,
    );
    async fn agent_completed(&self, run_id: &str, agent_name: &str, result: &str, execution_time_ms: Option<u64>);
}

/// A bridge is constructed with its user's identity baked in, so events can
/// never cross to another user's stream (§4.5 Isolation).
pub struct WebSocketBridge {
    user_id: String,
    manager: Mutex<Option<Arc<dyn WebSocketManager>>>,
    // Serializes sends so events for one user observe program order (§5).
    send_lock: SendLock<()>,
}

impl WebSocketBridge {
    pub fn new(user_id: impl Into<String>, manager: Option<Arc<dyn WebSocketManager>>) -> Self {
        Self { user_id: user_id.into(), manager: Mutex::new(manager), send_lock: SendLock::new(()) }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// `set_websocket_manager` propagates to every live session's bridge (§4.4).
    pub fn set_manager(&self, manager: Option<Arc<dyn WebSocketManager>>) {
        *self.manager.lock().unwrap() = manager;
    }

    fn current_manager(&self) -> Option<Arc<dyn WebSocketManager>> {
        self.manager.lock().unwrap().clone()
    }

    fn log_degraded(&self, method: &str, err: &FabricError) {
        tracing::warn!(user_id = %self.user_id, method, error = %err, "websocket event degraded to no-op");
    }
}

#[async_trait]
impl EmitLifecycleEvent for WebSocketBridge {
    async fn agent_started(&self, run_id: &str, agent_name: &str) {
        let _guard = self.send_lock.lock().await;
        let Some(manager) = self.current_manager() else {
            tracing::warn!(user_id = %self.user_id, "no websocket manager attached");
            return;
        };
        if let Err(err) = manager.notify_agent_started(&self.user_id, run_id, agent_name).await {
            self.log_degraded("agent_started", &err);
        }
    }

    async fn agent_thinking(
        &self,
        run_id: &str,
        agent_name: &str,
        reasoning: &str,
        step_number: Option<u32>,
        progress_percentage: Option<f64>,
    ) {
        let _guard = self.send_lock.lock().await;
        let Some(manager) = self.current_manager() else {
            tracing::warn!(user_id = %self.user_id, "no websocket manager attached");
            return;
        };
        if let Err(err) = manager
            .notify_agent_thinking(&self.user_id, run_id, agent_name, reasoning, step_number, progress_percentage)
            .await
        {
            self.log_degraded("agent_thinking", &err);
        }
    }

    async fn tool_executing(&self, run_id: &str, agent_name: &str, tool_name: &str, parameters: &str) {
        let _guard = self.send_lock.lock().await;
        let Some(manager) = self.current_manager() else {
            tracing::warn!(user_id = %self.user_id, "no websocket manager attached");
            return;
        };
        if let Err(err) = manager.notify_tool_executing(&self.user_id, run_id, agent_name, tool_name, parameters).await
        {
            self.log_degraded("tool_executing", &err);
        }
    }

    async fn tool_completed(
        &self,
        run_id: &str,
        agent_name: &str,
        tool_name: &str,
        result: &str,
        duration_ms: Option<u64>,
    ) {
        let _guard = self.send_lock.lock().await;
        let Some(manager) = self.current_manager() else {
            tracing::warn!(user_id = %self.user_id, "no websocket manager attached");
            return;
        };
        if let Err(err) =
            manager.notify_tool_completed(&self.user_id, run_id, agent_name, tool_name, result, duration_ms).await
        {
            self.log_degraded("tool_completed", &err);
        }
    }

    async fn agent_completed(&self, run_id: &str, agent_name: &str, result: &str, execution_time_ms: Option<u64>) {
        let _guard = self.send_lock.lock().await;
        let Some(manager) = self.current_manager() else {
            tracing::warn!(user_id = %self.user_id, "no websocket manager attached");
            return;
        };
        if let Err(err) =
            manager.notify_agent_completed(&self.user_id, run_id, agent_name, result, execution_time_ms).await
        {
            self.log_degraded("agent_completed", &err);
        }
    }
}
