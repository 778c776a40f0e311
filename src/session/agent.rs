//! Agents are opaque runnables (§1 Out of scope: "the LLM/agent business
//! logic itself"); the fabric only needs a name and an idempotent teardown.

use crate::error::FabricResult;
use async_trait::async_trait;

/// (I-life) `cleanup`/`close` must be safe to call more than once.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn cleanup(&self) -> FabricResult<()> {
        Ok(())
    }

    async fn close(&self) -> FabricResult<()> {
        Ok(())
    }
}
