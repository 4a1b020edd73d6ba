//! Function-call orchestration: parallel tool dispatch, callback chains,
//! response merging, and auth-request generation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;
use uuid::Uuid;

use crate::agent::LlmAgent;
use crate::agent::callbacks::{run_after_tool_callbacks, run_before_tool_callbacks};
use crate::auth::{AuthToolArguments, REQUEST_CREDENTIAL_TOOL_NAME};
use crate::content::{Content, FunctionCall, Part};
use crate::context::InvocationContext;
use crate::error::{AgentError, Result};
use crate::event::{Event, EventActions};
use crate::tool::{Tool, ToolContext};

/// Marker prefix of function-call ids generated by the framework. Ids
/// carrying it are stripped before content reaches a model.
pub const FUNCTION_CALL_ID_PREFIX: &str = "adk-";

/// Generate a framework function-call id.
#[must_use]
pub fn generate_client_function_call_id() -> String {
    format!("{FUNCTION_CALL_ID_PREFIX}{}", Uuid::new_v4().simple())
}

/// Assign fresh framework ids to call parts the model left without one.
pub fn populate_client_function_call_ids(content: &mut Content) {
    for part in &mut content.parts {
        if let Part::FunctionCall(call) = part
            && call.id.as_deref().is_none_or(str::is_empty)
        {
            call.id = Some(generate_client_function_call_id());
        }
    }
}

/// Strip framework-generated ids so downstream systems never see them.
pub fn remove_client_function_call_ids(content: &mut Content) {
    for part in &mut content.parts {
        match part {
            Part::FunctionCall(call) => {
                if call.id.as_deref().is_some_and(|id| id.starts_with(FUNCTION_CALL_ID_PREFIX)) {
                    call.id = None;
                }
            }
            Part::FunctionResponse(response) => {
                if response
                    .id
                    .as_deref()
                    .is_some_and(|id| id.starts_with(FUNCTION_CALL_ID_PREFIX))
                {
                    response.id = None;
                }
            }
            _ => {}
        }
    }
}

/// Ids of calls in the event whose tools are long-running.
#[must_use]
pub fn long_running_tool_ids(
    event: &Event,
    tools: &HashMap<String, Arc<dyn Tool>>,
) -> HashSet<String> {
    event
        .function_calls()
        .into_iter()
        .filter(|call| {
            tools
                .get(&call.name)
                .is_some_and(|tool| tool.is_long_running())
        })
        .filter_map(|call| call.id.clone())
        .collect()
}

/// Execute the calls of a function-call event and merge the responses.
///
/// Calls run concurrently; `filter` restricts execution to the given call
/// ids (used to resume a subset after an auth round trip). Returns `None`
/// when nothing produced a response (all long-running, or nothing matched
/// the filter).
pub(crate) async fn handle_function_calls(
    ctx: &InvocationContext,
    agent: &LlmAgent,
    function_call_event: &Event,
    tools: &HashMap<String, Arc<dyn Tool>>,
    filter: Option<&HashSet<String>>,
) -> Result<Option<Event>> {
    let calls: Vec<FunctionCall> = function_call_event
        .function_calls()
        .into_iter()
        .filter(|call| {
            filter.is_none_or(|ids| call.id.as_deref().is_some_and(|id| ids.contains(id)))
        })
        .cloned()
        .collect();
    if calls.is_empty() {
        return Ok(None);
    }

    let results = join_all(
        calls
            .iter()
            .map(|call| execute_single_call(ctx, agent, call, tools)),
    )
    .await;

    let mut events = Vec::new();
    for result in results {
        if let Some(event) = result? {
            events.push(event);
        }
    }
    if events.is_empty() {
        return Ok(None);
    }
    Ok(Some(merge_parallel_function_response_events(&events)))
}

/// Execute one call: resolve the tool, drive the callback chains, build
/// the response event. `None` for a long-running tool that returned
/// nothing yet.
pub(crate) async fn execute_single_call(
    ctx: &InvocationContext,
    agent: &LlmAgent,
    call: &FunctionCall,
    tools: &HashMap<String, Arc<dyn Tool>>,
) -> Result<Option<Event>> {
    let tool = tools.get(&call.name).ok_or_else(|| AgentError::ToolNotFound {
        name: call.name.clone(),
    })?;
    let call_id = call.id.clone().unwrap_or_default();
    let tool_ctx = ToolContext::new(ctx, call_id.clone());
    debug!(tool = %call.name, id = %call_id, "executing tool");

    let override_response =
        run_before_tool_callbacks(&agent.before_tool_callbacks, tool.as_ref(), &call.args, &tool_ctx)
            .await?
            .filter(|map| !map.is_empty());
    let mut response = match override_response {
        Some(map) => map,
        None => tool.run(call.args.clone(), &tool_ctx).await?,
    };
    if let Some(replacement) = run_after_tool_callbacks(
        &agent.after_tool_callbacks,
        tool.as_ref(),
        &call.args,
        &tool_ctx,
        &response,
    )
    .await?
    .filter(|map| !map.is_empty())
    {
        response = replacement;
    }

    if tool.is_long_running() && response.is_empty() {
        return Ok(None);
    }

    let mut event = ctx.agent.new_event(ctx).with_actions(tool_ctx.take_actions());
    event.content = Some(Content::user(vec![Part::function_response(
        Some(call_id),
        call.name.clone(),
        response,
    )]));
    Ok(Some(event))
}

/// Merge parallel function-response events into one.
///
/// Parts are concatenated in event order; a response part whose id is
/// already present is inserted adjacent to the earlier occurrence.
/// Requested auth configs are unioned; the merged event carries a fresh
/// id and the first input's timestamp.
#[must_use]
pub fn merge_parallel_function_response_events(events: &[Event]) -> Event {
    let Some(base) = events.first() else {
        return Event::new("");
    };
    if events.len() == 1 {
        return base.clone();
    }

    let mut parts: Vec<Part> = Vec::new();
    let mut actions = EventActions::default();
    for event in events {
        if let Some(content) = &event.content {
            for part in &content.parts {
                let existing = part
                    .as_function_response()
                    .and_then(|r| r.id.as_ref())
                    .and_then(|id| {
                        parts.iter().position(|p| {
                            p.as_function_response().and_then(|r| r.id.as_ref()) == Some(id)
                        })
                    });
                match existing {
                    Some(pos) => parts.insert(pos + 1, part.clone()),
                    None => parts.push(part.clone()),
                }
            }
        }
        actions.merge(event.actions.clone());
    }

    let mut merged = base.clone();
    merged.id = Event::new_id();
    merged.content = Some(Content::user(parts));
    merged.actions = actions;
    merged
}

/// Build the credential-request event for a response event that carries
/// `requested_auth_configs`: one synthetic function call per entry, each
/// added to the long-running id set. Emitted before the response event.
pub fn generate_auth_event(
    ctx: &InvocationContext,
    function_response_event: &Event,
) -> Result<Option<Event>> {
    let requested = &function_response_event.actions.requested_auth_configs;
    if requested.is_empty() {
        return Ok(None);
    }

    let mut parts = Vec::with_capacity(requested.len());
    let mut long_running_tool_ids = HashSet::new();
    for (function_call_id, auth_config) in requested {
        let args = AuthToolArguments {
            function_call_id: function_call_id.clone(),
            auth_config: auth_config.clone(),
        }
        .to_args()?;
        let id = generate_client_function_call_id();
        long_running_tool_ids.insert(id.clone());
        parts.push(Part::FunctionCall(FunctionCall {
            id: Some(id),
            name: REQUEST_CREDENTIAL_TOOL_NAME.to_string(),
            args,
        }));
    }

    let mut event = ctx
        .agent
        .new_event(ctx)
        .with_content(Content::model(parts));
    event.long_running_tool_ids = long_running_tool_ids;
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::JsonMap;
    use serde_json::json;

    fn response_event(id: &str, name: &str, value: i64) -> Event {
        let mut response = JsonMap::new();
        response.insert("r".to_string(), json!(value));
        Event::new("agent").with_content(Content::user(vec![Part::function_response(
            Some(id.to_string()),
            name,
            response,
        )]))
    }

    #[test]
    fn test_populate_and_strip_ids() {
        let mut content = Content::model(vec![Part::function_call("x", JsonMap::new())]);
        populate_client_function_call_ids(&mut content);
        let id = content.parts[0]
            .as_function_call()
            .and_then(|c| c.id.clone())
            .expect("id assigned");
        assert!(id.starts_with(FUNCTION_CALL_ID_PREFIX));

        remove_client_function_call_ids(&mut content);
        assert!(content.parts[0].as_function_call().expect("call").id.is_none());
    }

    #[test]
    fn test_strip_keeps_foreign_ids() {
        let mut content = Content::model(vec![Part::FunctionCall(FunctionCall {
            id: Some("srv-1".to_string()),
            name: "x".to_string(),
            args: JsonMap::new(),
        })]);
        remove_client_function_call_ids(&mut content);
        assert_eq!(
            content.parts[0].as_function_call().expect("call").id.as_deref(),
            Some("srv-1")
        );
    }

    #[test]
    fn test_merge_single_event_is_identity() {
        let event = response_event("i1", "x", 1);
        let merged = merge_parallel_function_response_events(std::slice::from_ref(&event));
        assert_eq!(merged, event);
    }

    #[test]
    fn test_merge_gets_fresh_id_and_first_timestamp() {
        let a = response_event("i1", "x", 1);
        let b = response_event("i2", "y", 2);
        let merged = merge_parallel_function_response_events(&[a.clone(), b.clone()]);
        assert_ne!(merged.id, a.id);
        assert_ne!(merged.id, b.id);
        assert_eq!(merged.timestamp, a.timestamp);
        let responses = merged.function_responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id.as_deref(), Some("i1"));
        assert_eq!(responses[1].id.as_deref(), Some("i2"));
    }

    #[test]
    fn test_merge_inserts_duplicate_ids_adjacently() {
        let a = response_event("i1", "x", 1);
        let b = response_event("i2", "y", 2);
        let c = response_event("i1", "x", 3);
        let merged = merge_parallel_function_response_events(&[a, b, c]);
        let ids: Vec<_> = merged
            .function_responses()
            .iter()
            .map(|r| r.id.clone().expect("id"))
            .collect();
        assert_eq!(ids, vec!["i1", "i1", "i2"]);
    }

    #[test]
    fn test_merge_unions_auth_requests() {
        let mut a = response_event("i1", "x", 1);
        a.actions
            .requested_auth_configs
            .insert("i1".to_string(), crate::auth::AuthConfig::new(json!({"s": 1})));
        let mut b = response_event("i2", "y", 2);
        b.actions
            .requested_auth_configs
            .insert("i2".to_string(), crate::auth::AuthConfig::new(json!({"s": 2})));
        let merged = merge_parallel_function_response_events(&[a, b]);
        assert_eq!(merged.actions.requested_auth_configs.len(), 2);
    }
}
