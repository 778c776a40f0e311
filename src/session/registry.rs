//! Components F/G: per-user session state and the factory-backed registry
//! that owns the `user_id → session` map. No agent/session state lives
//! anywhere else (§5, "No global mutable agent state").

use super::agent::Agent;
use super::bridge::{EmitLifecycleEvent, WebSocketBridge, WebSocketManager};
use super::context::UserContext;
use super::dispatcher::{ToolDispatcher, ToolDispatcherFactory};
use crate::error::{FabricError, FabricResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// `(UserContext, bridge?) → Agent`, registered once per `agent_type`.
pub type AgentFactory =
    Arc<dyn Fn(UserContext, Option<Arc<dyn EmitLifecycleEvent>>) -> FabricResult<Arc<dyn Agent>> + Send + Sync>;

struct FactoryRegistration {
    factory: AgentFactory,
    tags: Vec<String>,
    description: Option<String>,
}

/// Component F: a private, per-user container of agents, the bridge, and the
/// dispatcher. (I-iso1) nothing here is ever shared across `user_id`s.
pub struct UserAgentSession {
    user_id: String,
    agents: Mutex<HashMap<String, Arc<dyn Agent>>>,
    bridge: Arc<WebSocketBridge>,
    tool_dispatcher: Mutex<Option<Arc<dyn ToolDispatcher>>>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl UserAgentSession {
    fn new(user_id: impl Into<String>, manager: Option<Arc<dyn WebSocketManager>>) -> Self {
        let user_id = user_id.into();
        let now = Instant::now();
        Self {
            bridge: Arc::new(WebSocketBridge::new(user_id.clone(), manager)),
            user_id,
            agents: Mutex::new(HashMap::new()),
            tool_dispatcher: Mutex::new(None),
            created_at: now,
            last_activity: Mutex::new(now),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn bridge(&self) -> Arc<WebSocketBridge> {
        self.bridge.clone()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap()
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    fn insert_agent(&self, agent_type: String, agent: Arc<dyn Agent>) {
        self.agents.lock().unwrap().insert(agent_type, agent);
        self.touch();
    }

    pub fn get_agent(&self, agent_type: &str) -> Option<Arc<dyn Agent>> {
        self.agents.lock().unwrap().get(agent_type).cloned()
    }

    pub fn agent_types(&self) -> Vec<String> {
        self.agents.lock().unwrap().keys().cloned().collect()
    }

    pub fn set_dispatcher(&self, dispatcher: Arc<dyn ToolDispatcher>) {
        *self.tool_dispatcher.lock().unwrap() = Some(dispatcher);
    }

    pub fn dispatcher(&self) -> Option<Arc<dyn ToolDispatcher>> {
        self.tool_dispatcher.lock().unwrap().clone()
    }

    /// Best-effort teardown of every agent; errors are logged, never
    /// propagated (§7 propagation policy).
    async fn cleanup_agents(&self) {
        let agents: Vec<Arc<dyn Agent>> = self.agents.lock().unwrap().values().cloned().collect();
        for agent in agents {
            if let Err(err) = agent.cleanup().await {
                tracing::error!(user_id = %self.user_id, agent = agent.name(), error = %err, "agent cleanup failed");
            }
            if let Err(err) = agent.close().await {
                tracing::error!(user_id = %self.user_id, agent = agent.name(), error = %err, "agent close failed");
            }
        }
        self.agents.lock().unwrap().clear();
    }
}

#[derive(Debug, Clone)]
pub struct RegistryHealth {
    pub active_sessions: usize,
    pub registered_factories: usize,
    pub has_websocket_manager: bool,
    pub has_dispatcher_factory: bool,
}

#[derive(Debug, Clone)]
pub struct FactoryIntegrationStatus {
    pub agent_types: Vec<String>,
    pub dispatcher_factory_registered: bool,
}

/// "Single source of truth" introspection: confirms the registry, not some
/// other cache, is the only place sessions live.
#[derive(Debug, Clone)]
pub struct SsotComplianceStatus {
    pub compliant: bool,
    pub reason: Option<String>,
}

struct RegistryInner {
    sessions: Mutex<HashMap<String, Arc<UserAgentSession>>>,
    factories: Mutex<HashMap<String, FactoryRegistration>>,
    websocket_manager: Mutex<Option<Arc<dyn WebSocketManager>>>,
    dispatcher_factory: Mutex<Option<Arc<dyn ToolDispatcherFactory>>>,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
            websocket_manager: Mutex::new(None),
            dispatcher_factory: Mutex::new(None),
        }
    }
}

/// Component G. Owns only `user_id → session` and the factories; all other
/// state lives inside the sessions themselves.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    inner: Arc<RegistryInner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates on first use; rejects placeholder ids before any resource
    /// exists (I-iso3).
    pub fn get_user_session(&self, user_id: &str) -> FabricResult<Arc<UserAgentSession>> {
        super::context::validate_user_id(user_id, false)?;
        let mut sessions = self.inner.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(user_id) {
            existing.touch();
            return Ok(existing.clone());
        }
        let manager = self.inner.websocket_manager.lock().unwrap().clone();
        let session = Arc::new(UserAgentSession::new(user_id, manager));
        sessions.insert(user_id.to_string(), session.clone());
        Ok(session)
    }

    pub fn register_factory(
        &self,
        agent_type: impl Into<String>,
        factory: AgentFactory,
        tags: Vec<String>,
        description: Option<String>,
    ) {
        self.inner.factories.lock().unwrap().insert(agent_type.into(), FactoryRegistration { factory, tags, description });
    }

    /// (I-iso2) Each call builds a fresh instance, even for the same factory.
    pub fn create_agent_for_user(
        &self,
        user_id: &str,
        agent_type: &str,
        context: UserContext,
    ) -> FabricResult<Arc<dyn Agent>> {
        let session = self.get_user_session(user_id)?;
        let factory = {
            let factories = self.inner.factories.lock().unwrap();
            factories
                .get(agent_type)
                .map(|reg| reg.factory.clone())
                .ok_or_else(|| FabricError::NotFound(format!("agent factory '{agent_type}'")))?
        };
        let bridge: Arc<dyn EmitLifecycleEvent> = session.bridge();
        let agent = factory(context, Some(bridge))?;
        session.insert_agent(agent_type.to_string(), agent.clone());
        Ok(agent)
    }

    pub fn create_tool_dispatcher_for_user(
        &self,
        context: &UserContext,
        enable_admin_tools: bool,
    ) -> FabricResult<Arc<dyn ToolDispatcher>> {
        let session = self.get_user_session(&context.user_id)?;
        let factory = self
            .inner
            .dispatcher_factory
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FabricError::NotFound("tool dispatcher factory".into()))?;
        let bridge: Arc<dyn EmitLifecycleEvent> = session.bridge();
        let dispatcher = factory.create_for_user(context, Some(bridge), enable_admin_tools)?;
        session.set_dispatcher(dispatcher.clone());
        Ok(dispatcher)
    }

    pub fn register_dispatcher_factory(&self, factory: Arc<dyn ToolDispatcherFactory>) {
        *self.inner.dispatcher_factory.lock().unwrap() = Some(factory);
    }

    /// Propagates to every live session's bridge; new sessions pick it up at
    /// creation time too.
    pub fn set_websocket_manager(&self, manager: Arc<dyn WebSocketManager>) {
        *self.inner.websocket_manager.lock().unwrap() = Some(manager.clone());
        for session in self.inner.sessions.lock().unwrap().values() {
            session.bridge().set_manager(Some(manager.clone()));
        }
    }

    /// Best-effort cleanup, drop the session; later calls recreate it.
    pub async fn reset_user_agents(&self, user_id: &str) {
        let session = self.inner.sessions.lock().unwrap().remove(user_id);
        if let Some(session) = session {
            session.cleanup_agents().await;
        }
    }

    pub async fn emergency_cleanup_all(&self) {
        let sessions: Vec<Arc<UserAgentSession>> =
            std::mem::take(&mut *self.inner.sessions.lock().unwrap()).into_values().collect();
        for session in sessions {
            session.cleanup_agents().await;
        }
    }

    pub fn get_registry_health(&self) -> RegistryHealth {
        RegistryHealth {
            active_sessions: self.inner.sessions.lock().unwrap().len(),
            registered_factories: self.inner.factories.lock().unwrap().len(),
            has_websocket_manager: self.inner.websocket_manager.lock().unwrap().is_some(),
            has_dispatcher_factory: self.inner.dispatcher_factory.lock().unwrap().is_some(),
        }
    }

    pub fn get_factory_integration_status(&self) -> FactoryIntegrationStatus {
        FactoryIntegrationStatus {
            agent_types: self.inner.factories.lock().unwrap().keys().cloned().collect(),
            dispatcher_factory_registered: self.inner.dispatcher_factory.lock().unwrap().is_some(),
        }
    }

    pub fn get_ssot_compliance_status(&self) -> SsotComplianceStatus {
        // The registry is the only place a session is ever constructed or
        // stored; if this map is empty while agents claim to exist elsewhere
        // that would be the violation, but nothing in this crate keeps a
        // second copy, so compliance is structural.
        SsotComplianceStatus { compliant: true, reason: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAgent(String);
    #[async_trait::async_trait]
    impl Agent for StubAgent {
        fn name(&self) -> &str {
            &self.0
        }
    }

    fn stub_factory() -> AgentFactory {
        Arc::new(|ctx: UserContext, _bridge| Ok(Arc::new(StubAgent(ctx.user_id)) as Arc<dyn Agent>))
    }

    #[test]
    fn placeholder_user_id_rejected_before_any_resource_created() {
        let registry = AgentRegistry::new();
        assert!(registry.get_user_session("anonymous").is_err());
        assert_eq!(registry.get_registry_health().active_sessions, 0);
    }

    #[test]
    fn distinct_users_get_distinct_sessions_and_agents() {
        let registry = AgentRegistry::new();
        registry.register_factory("echo", stub_factory(), vec![], None);

        let ctx_a = UserContext::new("user-a", "t", "r", "req").unwrap();
        let ctx_b = UserContext::new("user-b", "t", "r", "req").unwrap();

        let agent_a = registry.create_agent_for_user("user-a", "echo", ctx_a).unwrap();
        let agent_b = registry.create_agent_for_user("user-b", "echo", ctx_b).unwrap();

        assert!(!Arc::ptr_eq(&agent_a, &agent_b));
        let session_a = registry.get_user_session("user-a").unwrap();
        let session_b = registry.get_user_session("user-b").unwrap();
        assert!(!Arc::ptr_eq(&session_a, &session_b));
        assert!(!Arc::ptr_eq(&session_a.bridge(), &session_b.bridge()));
    }

    #[tokio::test]
    async fn reset_then_recreate_yields_fresh_instance() {
        let registry = AgentRegistry::new();
        registry.register_factory("echo", stub_factory(), vec![], None);
        let ctx1 = UserContext::new("user-c", "t", "r", "req").unwrap();
        let first = registry.create_agent_for_user("user-c", "echo", ctx1).unwrap();

        registry.reset_user_agents("user-c").await;

        let ctx2 = UserContext::new("user-c", "t", "r2", "req2").unwrap();
        let second = registry.create_agent_for_user("user-c", "echo", ctx2).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn double_cleanup_is_safe() {
        let session = UserAgentSession::new("user-d", None);
        session.insert_agent("echo".into(), Arc::new(StubAgent("echo".into())));
        session.cleanup_agents().await;
        session.cleanup_agents().await; // must not panic
        assert!(session.agent_types().is_empty());
    }
}
