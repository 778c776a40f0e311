//! Tool dispatching is an external collaborator (§1 Out of scope: "the
//! LLM/agent business logic itself"); the fabric only specifies how one gets
//! built per user and optionally wired to the WebSocket bridge.

use super::bridge::EmitLifecycleEvent;
use super::context::UserContext;
use crate::error::FabricResult;
use std::sync::Arc;

/// Opaque per-user tool dispatcher. The fabric never inspects its contents.
pub trait ToolDispatcher: Send + Sync {}

/// `(UserContext, bridge?, enable_admin_tools?) → Dispatcher` per §4.4.
pub trait ToolDispatcherFactory: Send + Sync {
    fn create_for_user(
        &self,
        context: &UserContext,
        bridge: Option<Arc<dyn EmitLifecycleEvent>>,
        enable_admin_tools: bool,
    ) -> FabricResult<Arc<dyn ToolDispatcher>>;
}
