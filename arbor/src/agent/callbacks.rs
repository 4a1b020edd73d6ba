//! Lifecycle callback chains.
//!
//! Callbacks are ordered lists driven with first-wins semantics: the
//! first callback returning a non-`None` override short-circuits the rest
//! (and, for before-callbacks, the wrapped operation itself).
//!
//! Every callback trait has a blanket impl for the matching sync closure,
//! so tests and simple hooks need no boilerplate; implement the trait
//! directly when the callback has to await.

use std::sync::Arc;

use async_trait::async_trait;

use crate::content::{Content, JsonMap};
use crate::context::CallbackContext;
use crate::error::Result;
use crate::model::{LlmRequest, LlmResponse};
use crate::tool::{Tool, ToolContext};

/// Runs before or after an agent's own execution. Returning content
/// replaces (before) or extends (after) the agent's output.
#[async_trait]
pub trait AgentCallback: Send + Sync {
    /// Invoke the callback.
    async fn call(&self, ctx: &CallbackContext) -> Result<Option<Content>>;
}

#[async_trait]
impl<F> AgentCallback for F
where
    F: Fn(&CallbackContext) -> Result<Option<Content>> + Send + Sync,
{
    async fn call(&self, ctx: &CallbackContext) -> Result<Option<Content>> {
        self(ctx)
    }
}

/// Runs before the model call; a returned response is used in place of
/// calling the model.
#[async_trait]
pub trait BeforeModelCallback: Send + Sync {
    /// Invoke the callback. May mutate the outgoing request.
    async fn call(
        &self,
        ctx: &CallbackContext,
        request: &mut LlmRequest,
    ) -> Result<Option<LlmResponse>>;
}

#[async_trait]
impl<F> BeforeModelCallback for F
where
    F: Fn(&CallbackContext, &mut LlmRequest) -> Result<Option<LlmResponse>> + Send + Sync,
{
    async fn call(
        &self,
        ctx: &CallbackContext,
        request: &mut LlmRequest,
    ) -> Result<Option<LlmResponse>> {
        self(ctx, request)
    }
}

/// Runs on each model response; a returned response replaces it.
#[async_trait]
pub trait AfterModelCallback: Send + Sync {
    /// Invoke the callback.
    async fn call(
        &self,
        ctx: &CallbackContext,
        response: &LlmResponse,
    ) -> Result<Option<LlmResponse>>;
}

#[async_trait]
impl<F> AfterModelCallback for F
where
    F: Fn(&CallbackContext, &LlmResponse) -> Result<Option<LlmResponse>> + Send + Sync,
{
    async fn call(
        &self,
        ctx: &CallbackContext,
        response: &LlmResponse,
    ) -> Result<Option<LlmResponse>> {
        self(ctx, response)
    }
}

/// Runs before a tool executes; a returned map becomes the tool's
/// response without executing it.
#[async_trait]
pub trait BeforeToolCallback: Send + Sync {
    /// Invoke the callback.
    async fn call(
        &self,
        tool: &dyn Tool,
        args: &JsonMap,
        ctx: &ToolContext,
    ) -> Result<Option<JsonMap>>;
}

#[async_trait]
impl<F> BeforeToolCallback for F
where
    F: Fn(&dyn Tool, &JsonMap, &ToolContext) -> Result<Option<JsonMap>> + Send + Sync,
{
    async fn call(
        &self,
        tool: &dyn Tool,
        args: &JsonMap,
        ctx: &ToolContext,
    ) -> Result<Option<JsonMap>> {
        self(tool, args, ctx)
    }
}

/// Runs after a tool executes; a returned map replaces the response.
#[async_trait]
pub trait AfterToolCallback: Send + Sync {
    /// Invoke the callback.
    async fn call(
        &self,
        tool: &dyn Tool,
        args: &JsonMap,
        ctx: &ToolContext,
        response: &JsonMap,
    ) -> Result<Option<JsonMap>>;
}

#[async_trait]
impl<F> AfterToolCallback for F
where
    F: Fn(&dyn Tool, &JsonMap, &ToolContext, &JsonMap) -> Result<Option<JsonMap>> + Send + Sync,
{
    async fn call(
        &self,
        tool: &dyn Tool,
        args: &JsonMap,
        ctx: &ToolContext,
        response: &JsonMap,
    ) -> Result<Option<JsonMap>> {
        self(tool, args, ctx, response)
    }
}

/// Drive an agent-callback chain to the first override.
pub(crate) async fn run_agent_callbacks(
    callbacks: &[Arc<dyn AgentCallback>],
    ctx: &CallbackContext,
) -> Result<Option<Content>> {
    for callback in callbacks {
        if let Some(content) = callback.call(ctx).await? {
            return Ok(Some(content));
        }
    }
    Ok(None)
}

/// Drive a before-model chain to the first override.
pub(crate) async fn run_before_model_callbacks(
    callbacks: &[Arc<dyn BeforeModelCallback>],
    ctx: &CallbackContext,
    request: &mut LlmRequest,
) -> Result<Option<LlmResponse>> {
    for callback in callbacks {
        if let Some(response) = callback.call(ctx, request).await? {
            return Ok(Some(response));
        }
    }
    Ok(None)
}

/// Drive an after-model chain to the first override.
pub(crate) async fn run_after_model_callbacks(
    callbacks: &[Arc<dyn AfterModelCallback>],
    ctx: &CallbackContext,
    response: &LlmResponse,
) -> Result<Option<LlmResponse>> {
    for callback in callbacks {
        if let Some(replacement) = callback.call(ctx, response).await? {
            return Ok(Some(replacement));
        }
    }
    Ok(None)
}

/// Drive a before-tool chain to the first override.
pub(crate) async fn run_before_tool_callbacks(
    callbacks: &[Arc<dyn BeforeToolCallback>],
    tool: &dyn Tool,
    args: &JsonMap,
    ctx: &ToolContext,
) -> Result<Option<JsonMap>> {
    for callback in callbacks {
        if let Some(response) = callback.call(tool, args, ctx).await? {
            return Ok(Some(response));
        }
    }
    Ok(None)
}

/// Drive an after-tool chain to the first override.
pub(crate) async fn run_after_tool_callbacks(
    callbacks: &[Arc<dyn AfterToolCallback>],
    tool: &dyn Tool,
    args: &JsonMap,
    ctx: &ToolContext,
    response: &JsonMap,
) -> Result<Option<JsonMap>> {
    for callback in callbacks {
        if let Some(replacement) = callback.call(tool, args, ctx, response).await? {
            return Ok(Some(replacement));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::context::{InvocationContext, RunConfig};
    use crate::session::{InMemorySessionService, Session};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cb_ctx() -> CallbackContext {
        let agent = Agent::sequential("root", Vec::new()).expect("agent");
        let session = Arc::new(Session::new("s1", "app", "u", JsonMap::new()));
        let ctx = InvocationContext::new(
            agent,
            session,
            Arc::new(InMemorySessionService::new()),
            RunConfig::default(),
        );
        CallbackContext::new(&ctx)
    }

    #[tokio::test]
    async fn test_first_wins_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&calls);
        let c2 = Arc::clone(&calls);
        let chain: Vec<Arc<dyn AgentCallback>> = vec![
            Arc::new(move |_: &CallbackContext| -> Result<Option<Content>> {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }),
            Arc::new(move |_: &CallbackContext| -> Result<Option<Content>> {
                c2.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Content::model_text("override")))
            }),
            Arc::new(|_: &CallbackContext| -> Result<Option<Content>> {
                panic!("must not run past the first override");
            }),
        ];

        let ctx = cb_ctx();
        let result = run_agent_callbacks(&chain, &ctx).await.expect("chain");
        assert_eq!(result.expect("override").text(), "override");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
