//! Builds the request's content array from session history.
//!
//! Filtering: events without content, events on unrelated branches, and
//! auth-internal events are skipped; events authored by other agents are
//! rewritten as user-role context messages. Rearrangement: a trailing
//! function response is rewound to its originating call (dropping
//! interleaved events), and async responses in history are moved to sit
//! adjacent to their calls. Framework-generated function-call ids are
//! stripped last.

use async_trait::async_trait;

use crate::agent::IncludeContents;
use crate::auth::REQUEST_CREDENTIAL_TOOL_NAME;
use crate::content::{Content, Part};
use crate::context::InvocationContext;
use crate::error::{AgentError, Result};
use crate::event::{Event, USER_AUTHOR};
use crate::flow::LlmRequestProcessor;
use crate::flow::function_calls::{
    merge_parallel_function_response_events, remove_client_function_call_ids,
};
use crate::model::LlmRequest;

/// The history-building request processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentsProcessor;

#[async_trait]
impl LlmRequestProcessor for ContentsProcessor {
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>> {
        let Some(llm_agent) = ctx.agent.as_llm_agent() else {
            return Ok(Vec::new());
        };

        request.contents = match llm_agent.include_contents {
            IncludeContents::Default => get_contents(
                ctx.branch.as_deref(),
                &ctx.session.events(),
                ctx.agent.name(),
            )?,
            IncludeContents::None => current_turn_contents(ctx),
        };
        Ok(Vec::new())
    }
}

/// With history disabled, only the invocation's own input is sent.
fn current_turn_contents(ctx: &InvocationContext) -> Vec<Content> {
    ctx.user_content.clone().into_iter().collect()
}

/// Build the model-facing contents from session events.
pub(crate) fn get_contents(
    current_branch: Option<&str>,
    events: &[Event],
    agent_name: &str,
) -> Result<Vec<Content>> {
    let mut filtered: Vec<Event> = Vec::new();
    for event in events {
        let Some(content) = &event.content else {
            continue;
        };
        if content.parts.is_empty() {
            continue;
        }
        if !event_belongs_to_branch(current_branch, event) {
            continue;
        }
        if is_auth_event(event) {
            continue;
        }
        if is_other_agent_reply(agent_name, event) {
            filtered.push(convert_foreign_event(event));
        } else {
            filtered.push(event.clone());
        }
    }

    let rearranged = rearrange_latest_function_response(filtered)?;
    let rearranged = rearrange_async_function_responses(rearranged);

    Ok(rearranged
        .iter()
        .filter_map(|event| event.content.as_ref())
        .map(|content| {
            let mut content = content.clone();
            remove_client_function_call_ids(&mut content);
            content
        })
        .collect())
}

/// An event belongs to the current branch when it has no branch or its
/// branch is a (segment-boundary) prefix of the current one.
fn event_belongs_to_branch(current_branch: Option<&str>, event: &Event) -> bool {
    match &event.branch {
        None => true,
        Some(event_branch) => current_branch.is_some_and(|current| {
            current == event_branch || current.starts_with(&format!("{event_branch}."))
        }),
    }
}

/// Credential-request plumbing never reaches the model.
fn is_auth_event(event: &Event) -> bool {
    event
        .function_calls()
        .iter()
        .any(|c| c.name == REQUEST_CREDENTIAL_TOOL_NAME)
        || event
            .function_responses()
            .iter()
            .any(|r| r.name == REQUEST_CREDENTIAL_TOOL_NAME)
}

fn is_other_agent_reply(agent_name: &str, event: &Event) -> bool {
    event.author != agent_name && event.author != USER_AUTHOR
}

/// Present another agent's event as user-role context.
fn convert_foreign_event(event: &Event) -> Event {
    let mut parts = vec![Part::text("For context:")];
    if let Some(content) = &event.content {
        for part in &content.parts {
            match part {
                Part::Text { text, thought: false } => {
                    parts.push(Part::text(format!("[{}] said: {text}", event.author)));
                }
                Part::FunctionCall(call) => {
                    parts.push(Part::text(format!(
                        "[{}] called tool `{}` with parameters: {}",
                        event.author,
                        call.name,
                        serde_json::Value::Object(call.args.clone())
                    )));
                }
                Part::FunctionResponse(response) => {
                    parts.push(Part::text(format!(
                        "[{}] `{}` tool returned result: {}",
                        event.author,
                        response.name,
                        serde_json::Value::Object(response.response.clone())
                    )));
                }
                _ => {}
            }
        }
    }

    let mut converted = event.clone();
    converted.author = USER_AUTHOR.to_string();
    converted.content = Some(Content::user(parts));
    converted
}

/// When the last event is a function response whose call is not in the
/// immediately preceding event, rewind to the matching call event and
/// collapse everything in between into one merged response.
fn rearrange_latest_function_response(events: Vec<Event>) -> Result<Vec<Event>> {
    let Some(last) = events.last() else {
        return Ok(events);
    };
    let response_ids: std::collections::HashSet<String> = last
        .function_responses()
        .iter()
        .filter_map(|r| r.id.clone())
        .collect();
    if response_ids.is_empty() || events.len() < 2 {
        return Ok(events);
    }

    let matches_ids = |event: &Event| {
        event
            .function_calls()
            .iter()
            .any(|c| c.id.as_ref().is_some_and(|id| response_ids.contains(id)))
    };

    if matches_ids(&events[events.len() - 2]) {
        // Already adjacent.
        return Ok(events);
    }

    let call_idx = (0..events.len() - 1)
        .rev()
        .find(|&i| matches_ids(&events[i]))
        .ok_or_else(|| {
            AgentError::internal("no function-call event found for the trailing function response")
        })?;

    let response_events: Vec<Event> = events[call_idx + 1..]
        .iter()
        .filter(|event| {
            event
                .function_responses()
                .iter()
                .any(|r| r.id.as_ref().is_some_and(|id| response_ids.contains(id)))
        })
        .cloned()
        .collect();

    let mut result: Vec<Event> = events[..=call_idx].to_vec();
    result.push(merge_parallel_function_response_events(&response_events));
    Ok(result)
}

/// Move async function responses to sit immediately after their
/// originating call events, merging where several answer the same call.
fn rearrange_async_function_responses(events: Vec<Event>) -> Vec<Event> {
    use std::collections::{HashMap, HashSet};

    let mut deferred: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut consumed: HashSet<usize> = HashSet::new();

    for (i, event) in events.iter().enumerate() {
        let ids: HashSet<&String> = event
            .function_responses()
            .iter()
            .filter_map(|r| r.id.as_ref())
            .collect();
        if ids.is_empty() {
            continue;
        }
        let call_idx = (0..i).rev().find(|&j| {
            events[j]
                .function_calls()
                .iter()
                .any(|c| c.id.as_ref().is_some_and(|id| ids.contains(id)))
        });
        if let Some(j) = call_idx {
            deferred.entry(j).or_default().push(i);
            consumed.insert(i);
        }
    }

    let mut result = Vec::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        result.push(event.clone());
        if let Some(response_idxs) = deferred.get(&i) {
            let response_events: Vec<Event> =
                response_idxs.iter().map(|&k| events[k].clone()).collect();
            result.push(merge_parallel_function_response_events(&response_events));
        }
    }
    result
}
