//! Builds the system instruction buffer, with session-state templating.
//!
//! Template escapes: `{name}` substitutes session state (the name may
//! carry an `app:`, `user:`, or `temp:` scope prefix), `{artifact.name}`
//! substitutes artifact content, and a trailing `?` makes the lookup
//! optional. Invalid names are left verbatim; missing mandatory bindings
//! are fatal.

use async_trait::async_trait;

use crate::context::{InvocationContext, ReadonlyContext};
use crate::error::{AgentError, Result};
use crate::event::Event;
use crate::flow::LlmRequestProcessor;
use crate::model::LlmRequest;
use crate::session::state;

/// Appends the root agent's global instruction, then the agent's own.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstructionsProcessor;

#[async_trait]
impl LlmRequestProcessor for InstructionsProcessor {
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>> {
        let Some(llm_agent) = ctx.agent.as_llm_agent() else {
            return Ok(Vec::new());
        };
        let rctx = ReadonlyContext::new(ctx);

        let root = ctx.agent.root_agent();
        if let Some(root_llm) = root.as_llm_agent() {
            let root_rctx = ReadonlyContext {
                agent_name: root.name().to_string(),
                ..rctx.clone()
            };
            let (global, bypass) = root_llm.canonical_global_instruction(&root_rctx).await?;
            if !global.is_empty() {
                let global = if bypass {
                    global
                } else {
                    inject_session_state(ctx, &global).await?
                };
                request.append_instructions([global]);
            }
        }

        let (instruction, bypass) = llm_agent.canonical_instruction(&rctx).await?;
        if !instruction.is_empty() {
            let instruction = if bypass {
                instruction
            } else {
                inject_session_state(ctx, &instruction).await?
            };
            request.append_instructions([instruction]);
        }

        Ok(Vec::new())
    }
}

/// Substitute `{name}` escapes against session state and artifacts.
///
/// Substitution is a fixed point for values that contain no braces:
/// applying it twice equals applying it once.
pub async fn inject_session_state(ctx: &InvocationContext, template: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let boundary = after.find(['{', '}']);
        match boundary {
            Some(end) if after.as_bytes()[end] == b'}' => {
                let name = &after[..end];
                match resolve_binding(ctx, name.trim()).await? {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                // Unmatched or nested brace: not identifier position.
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolve one binding. `Ok(None)` leaves the escape verbatim.
async fn resolve_binding(ctx: &InvocationContext, name: &str) -> Result<Option<String>> {
    let (name, optional) = match name.strip_suffix('?') {
        Some(stripped) => (stripped, true),
        None => (name, false),
    };

    if let Some(artifact_name) = name.strip_prefix("artifact.") {
        let Some(service) = &ctx.artifact_service else {
            return Err(AgentError::configuration(
                "instruction references an artifact but no artifact service is configured",
            ));
        };
        let blob = service
            .load_artifact(
                &ctx.session.app_name,
                &ctx.session.user_id,
                &ctx.session.id,
                artifact_name,
                None,
            )
            .await?;
        return match blob {
            Some(blob) => Ok(Some(String::from_utf8_lossy(&blob.data).into_owned())),
            None if optional => Ok(Some(String::new())),
            None => Err(AgentError::state(format!(
                "artifact '{artifact_name}' not found for instruction template"
            ))),
        };
    }

    if state::validate_key(name).is_err() {
        return Ok(None);
    }
    match ctx.session.state_get(name) {
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(value) => Ok(Some(value.to_string())),
        None if optional => Ok(Some(String::new())),
        None => Err(AgentError::state(format!(
            "state key '{name}' not found for instruction template"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::artifact::{ArtifactService as _, InMemoryArtifactService};
    use crate::content::{Blob, JsonMap};
    use crate::context::RunConfig;
    use crate::session::{InMemorySessionService, Session};
    use serde_json::json;
    use std::sync::Arc;

    fn ctx_with_state(entries: &[(&str, serde_json::Value)]) -> InvocationContext {
        let agent = Agent::sequential("root", Vec::new()).expect("agent");
        let mut state = JsonMap::new();
        for (k, v) in entries {
            state.insert((*k).to_string(), v.clone());
        }
        let session = Arc::new(Session::new("s1", "app", "u", state));
        InvocationContext::new(
            agent,
            session,
            Arc::new(InMemorySessionService::new()),
            RunConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_substitutes_state_values() {
        let ctx = ctx_with_state(&[("city", json!("Zurich")), ("app:tone", json!("formal"))]);
        let out = inject_session_state(&ctx, "Talk about {city} in a {app:tone} tone.")
            .await
            .expect("inject");
        assert_eq!(out, "Talk about Zurich in a formal tone.");
    }

    #[tokio::test]
    async fn test_optional_missing_becomes_empty() {
        let ctx = ctx_with_state(&[]);
        let out = inject_session_state(&ctx, "Hello{nickname?}!").await.expect("inject");
        assert_eq!(out, "Hello!");
    }

    #[tokio::test]
    async fn test_missing_mandatory_is_fatal() {
        let ctx = ctx_with_state(&[]);
        assert!(inject_session_state(&ctx, "Hello {nickname}!").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_names_left_verbatim() {
        let ctx = ctx_with_state(&[]);
        let template = "JSON looks like {\"a\": 1} and {not valid} stays.";
        let out = inject_session_state(&ctx, template).await.expect("inject");
        assert_eq!(out, template);
    }

    #[tokio::test]
    async fn test_unmatched_brace_left_verbatim() {
        let ctx = ctx_with_state(&[("x", json!("1"))]);
        let out = inject_session_state(&ctx, "open { brace and {x}").await.expect("inject");
        assert_eq!(out, "open { brace and 1");
    }

    #[tokio::test]
    async fn test_substitution_is_idempotent() {
        let ctx = ctx_with_state(&[("who", json!("Ada"))]);
        let once = inject_session_state(&ctx, "Hi {who} and {missing?}").await.expect("first");
        let twice = inject_session_state(&ctx, &once).await.expect("second");
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_artifact_substitution() {
        let artifacts = Arc::new(InMemoryArtifactService::new());
        artifacts
            .save_artifact("app", "u", "s1", "notes.txt", Blob::new("text/plain", b"remember this".to_vec()))
            .await
            .expect("save");
        let ctx = ctx_with_state(&[]).with_artifact_service(artifacts);
        let out = inject_session_state(&ctx, "Context: {artifact.notes.txt}")
            .await
            .expect("inject");
        assert_eq!(out, "Context: remember this");
    }
}
