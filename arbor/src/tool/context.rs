//! The context handed to a tool for one execution.

use std::ops::Deref;
use std::sync::Arc;

use crate::auth::{AuthConfig, AuthHandler};
use crate::context::{CallbackContext, InvocationContext};
use crate::error::{AgentError, Result};
use crate::memory::{MemoryEntry, MemoryService};

/// Execution context for one tool invocation.
///
/// Derefs to [`CallbackContext`] for state and artifact access; adds the
/// function-call id, action shortcuts, and auth/memory plumbing.
pub struct ToolContext {
    /// Id of the function call being served.
    pub function_call_id: String,
    callback: CallbackContext,
    memory_service: Option<Arc<dyn MemoryService>>,
    app_name: String,
    user_id: String,
}

impl ToolContext {
    /// Build a tool context for one function call.
    #[must_use]
    pub fn new(ctx: &InvocationContext, function_call_id: impl Into<String>) -> Self {
        Self {
            function_call_id: function_call_id.into(),
            callback: CallbackContext::new(ctx),
            memory_service: ctx.memory_service.clone(),
            app_name: ctx.session.app_name.clone(),
            user_id: ctx.session.user_id.clone(),
        }
    }

    /// Route control to the named agent after this tool returns.
    pub fn transfer_to_agent(&self, agent_name: impl Into<String>) {
        self.callback
            .with_actions(|a| a.transfer_to_agent = Some(agent_name.into()));
    }

    /// Signal the nearest enclosing loop agent to terminate.
    pub fn escalate(&self) {
        self.callback.with_actions(|a| a.escalate = true);
    }

    /// Ask consumers to pass this tool's result through verbatim.
    pub fn skip_summarization(&self) {
        self.callback.with_actions(|a| a.skip_summarization = true);
    }

    /// Request credentials for this call. The flow emits a credential
    /// request before this call's response event.
    pub fn request_credential(&self, config: AuthConfig) {
        let id = self.function_call_id.clone();
        self.callback
            .with_actions(|a| a.requested_auth_configs.insert(id, config));
    }

    /// Read back a completed credential exchange, if the client has
    /// responded since the request.
    #[must_use]
    pub fn get_auth_response(&self, config: &AuthConfig) -> Option<AuthConfig> {
        let handler = AuthHandler::new(config.clone());
        let key = config.response_state_key();
        let mut state = crate::content::JsonMap::new();
        if let Some(value) = self.callback.state_get(&key) {
            state.insert(key, value);
        }
        handler.auth_response(&state)
    }

    /// Search long-term memory.
    pub async fn search_memory(&self, query: &str) -> Result<Vec<MemoryEntry>> {
        let service = self
            .memory_service
            .as_ref()
            .ok_or_else(|| AgentError::configuration("no memory service configured"))?;
        service
            .search_memory(&self.app_name, &self.user_id, query)
            .await
    }
}

impl Deref for ToolContext {
    type Target = CallbackContext;

    fn deref(&self) -> &Self::Target {
        &self.callback
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("function_call_id", &self.function_call_id)
            .field("agent_name", &self.callback.agent_name)
            .finish_non_exhaustive()
    }
}
