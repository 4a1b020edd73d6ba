//! Resumes tool calls that paused for credentials.
//!
//! When the most recent user event answers a credential request, the
//! completed exchange is stashed in `temp:`-scoped state, the originating
//! synthetic calls are located, the underlying tool-call ids extracted,
//! and the function-call orchestrator re-invoked for exactly those ids.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::auth::{AuthHandler, AuthToolArguments, REQUEST_CREDENTIAL_TOOL_NAME};
use crate::content::JsonMap;
use crate::context::{InvocationContext, ReadonlyContext};
use crate::error::Result;
use crate::event::{Event, USER_AUTHOR};
use crate::flow::{LlmRequestProcessor, function_calls};
use crate::model::LlmRequest;
use crate::tool::Tool;

/// The auth-resume request processor; second in every flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthPreprocessor;

#[async_trait]
impl LlmRequestProcessor for AuthPreprocessor {
    async fn run(&self, ctx: &InvocationContext, _request: &mut LlmRequest) -> Result<Vec<Event>> {
        let Some(llm_agent) = ctx.agent.as_llm_agent().cloned() else {
            return Ok(Vec::new());
        };
        let events = ctx.session.events();

        // The most recent user event decides whether anything resumes.
        let Some((user_idx, user_event)) = events
            .iter()
            .enumerate()
            .rev()
            .find(|(_, e)| e.author == USER_AUTHOR)
        else {
            return Ok(Vec::new());
        };
        let auth_responses: Vec<_> = user_event
            .function_responses()
            .into_iter()
            .filter(|r| r.name == REQUEST_CREDENTIAL_TOOL_NAME)
            .cloned()
            .collect();
        if auth_responses.is_empty() {
            return Ok(Vec::new());
        }

        // Stash the completed exchanges and remember which synthetic
        // calls were answered.
        let mut request_credential_ids = HashSet::new();
        let mut temp_state = JsonMap::new();
        for response in &auth_responses {
            let config = AuthHandler::parse_auth_response(&response.response)?;
            let handler = AuthHandler::new(config);
            let (key, value) = handler.state_entry()?;
            temp_state.insert(key, value);
            if let Some(id) = &response.id {
                request_credential_ids.insert(id.clone());
            }
        }
        ctx.session.merge_temp_state(temp_state);

        // Locate the synthetic credential-request calls and read the
        // underlying tool-call ids out of their arguments.
        let mut resume_ids = HashSet::new();
        for event in events[..user_idx].iter().rev() {
            let matching: Vec<_> = event
                .function_calls()
                .into_iter()
                .filter(|c| {
                    c.name == REQUEST_CREDENTIAL_TOOL_NAME
                        && c.id.as_ref().is_some_and(|id| request_credential_ids.contains(id))
                })
                .collect();
            if matching.is_empty() {
                continue;
            }
            for call in matching {
                let args = AuthToolArguments::from_args(&call.args)?;
                resume_ids.insert(args.function_call_id);
            }
            break;
        }
        if resume_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Find the model event carrying the paused tool calls and re-run
        // the orchestrator for exactly those ids.
        for event in events.iter().rev() {
            let has_paused_call = event.function_calls().iter().any(|c| {
                c.id.as_ref().is_some_and(|id| resume_ids.contains(id))
            });
            if !has_paused_call {
                continue;
            }
            debug!(count = resume_ids.len(), "resuming tool calls after auth");
            let rctx = ReadonlyContext::new(ctx);
            let tools: HashMap<String, Arc<dyn Tool>> = llm_agent
                .canonical_tools(&rctx)
                .await?
                .into_iter()
                .map(|tool| (tool.name().to_string(), tool))
                .collect();
            let merged =
                function_calls::handle_function_calls(ctx, &llm_agent, event, &tools, Some(&resume_ids))
                    .await?;
            return Ok(merged.into_iter().collect());
        }

        Ok(Vec::new())
    }
}
