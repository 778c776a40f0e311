//! Per-request identity. One `UserContext` is built per request and never
//! shared across users (§3, I-iso3).

use crate::error::{FabricError, FabricResult};
use std::collections::HashMap;

/// Strings that mark an obviously-placeholder identity. Checked
/// case-insensitively as a substring of `user_id`.
const PLACEHOLDER_MARKERS: &[&str] = &["placeholder", "anonymous", "undefined", "test_user", "dummy"];

pub(crate) fn validate_user_id(user_id: &str, allow_placeholders: bool) -> FabricResult<()> {
    if user_id.trim().is_empty() {
        return Err(FabricError::Validation("user_id must be non-empty".into()));
    }
    if !allow_placeholders {
        let lower = user_id.to_ascii_lowercase();
        if PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return Err(FabricError::Validation(format!("user_id '{user_id}' looks like a placeholder")));
        }
    }
    Ok(())
}

/// Identity and tracing metadata threaded through a single agent run.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub thread_id: String,
    pub run_id: String,
    pub request_id: String,
    pub agent_context: HashMap<String, String>,
    pub audit_metadata: HashMap<String, String>,
}

impl UserContext {
    /// Validates `user_id` per (I-iso3); rejects empty or placeholder-looking ids.
    pub fn new(
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> FabricResult<Self> {
        let user_id = user_id.into();
        validate_user_id(&user_id, false)?;
        Ok(Self {
            user_id,
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            request_id: request_id.into(),
            agent_context: HashMap::new(),
            audit_metadata: HashMap::new(),
        })
    }

    /// Skips the placeholder check, for test fixtures that legitimately want
    /// ids like `test_user`.
    pub fn new_for_test(
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> FabricResult<Self> {
        let user_id = user_id.into();
        validate_user_id(&user_id, true)?;
        Ok(Self {
            user_id,
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            request_id: request_id.into(),
            agent_context: HashMap::new(),
            audit_metadata: HashMap::new(),
        })
    }

    pub fn with_agent_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.agent_context.insert(key.into(), value.into());
        self
    }

    pub fn with_audit_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.audit_metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_id_rejected() {
        assert!(UserContext::new("", "t", "r", "req").is_err());
    }

    #[test]
    fn placeholder_user_id_rejected() {
        assert!(UserContext::new("anonymous-123", "t", "r", "req").is_err());
        assert!(UserContext::new("Placeholder", "t", "r", "req").is_err());
    }

    #[test]
    fn real_user_id_accepted() {
        assert!(UserContext::new("user-42", "t", "r", "req").is_ok());
    }

    #[test]
    fn test_constructor_allows_placeholder_markers() {
        assert!(UserContext::new_for_test("test_user", "t", "r", "req").is_ok());
    }
}
