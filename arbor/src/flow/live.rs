//! The live (bidirectional) flow loop.
//!
//! Preprocess builds the request, `connect` opens a duplex connection
//! seeded with prior history (transcribing the cache first), then a
//! sender task drains the live request queue while the receive loop turns
//! server messages into events. `transfer_to_agent` and `task_completed`
//! responses are control signals: the sender is cancelled, the connection
//! closed, and in the transfer case the target's live stream continues
//! the output.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt as _;
use tracing::{debug, warn};

use crate::content::{Content, FunctionCall, JsonMap, Part, Role};
use crate::context::InvocationContext;
use crate::error::{AgentError, Result};
use crate::event::{Event, EventStream};
use crate::live::{ActiveStreamingTool, TranscriptionEntry};
use crate::model::LlmRequest;
use crate::tool::{STOP_STREAMING_TOOL_NAME, StreamingFunctionTool, TASK_COMPLETED_TOOL_NAME, Tool};

use super::function_calls::{
    execute_single_call, generate_auth_event, merge_parallel_function_response_events,
    populate_client_function_call_ids,
};
use super::{LlmFlow, function_calls};

pub(super) fn run_live(flow: Arc<LlmFlow>, ctx: InvocationContext) -> EventStream {
    Box::pin(stream! {
        let llm_agent = match ctx.agent.as_llm_agent() {
            Some(llm) => llm.clone(),
            None => {
                yield Err(AgentError::internal(format!(
                    "live flow invoked on non-LLM agent '{}'",
                    ctx.agent.name()
                )));
                return;
            }
        };

        let mut request = LlmRequest::new();
        match Arc::clone(&flow).preprocess(&ctx, &llm_agent, &mut request).await {
            Ok(events) => {
                for event in events {
                    yield Ok(event);
                }
            }
            Err(e) => {
                yield Err(e);
                return;
            }
        }
        if ctx.is_ended() {
            return;
        }

        let llm = match llm_agent.canonical_model(&ctx.agent) {
            Ok(llm) => llm,
            Err(e) => {
                yield Err(e);
                return;
            }
        };
        let connection = match llm.connect(&request).await {
            Ok(connection) => connection,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        // Seed with request history plus whatever live exchange is still
        // only in the transcription cache.
        let mut history = request.contents.clone();
        let cached: Vec<TranscriptionEntry> = ctx.transcription_cache().drain(..).collect();
        history.extend(cached.into_iter().filter_map(TranscriptionEntry::into_content));
        if let Err(e) = connection.send_history(history).await {
            yield Err(e);
            return;
        }

        let Some(queue) = ctx.live_request_queue.clone() else {
            yield Err(AgentError::configuration("live run without a live request queue"));
            return;
        };
        let sender_connection = Arc::clone(&connection);
        let sender = tokio::spawn(async move {
            while let Some(item) = queue.recv().await {
                if item.close {
                    let _ = sender_connection.close().await;
                    break;
                }
                if let Some(blob) = item.blob
                    && sender_connection.send_realtime(blob).await.is_err()
                {
                    break;
                }
                if let Some(content) = item.content
                    && sender_connection.send_content(content).await.is_err()
                {
                    break;
                }
            }
        });

        let mut responses = match connection.receive().await {
            Ok(stream) => stream,
            Err(e) => {
                sender.abort();
                yield Err(e);
                return;
            }
        };

        while let Some(item) = responses.next().await {
            let response = match item {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "live connection failed");
                    sender.abort();
                    abort_streaming_tools(&ctx);
                    yield Err(e);
                    return;
                }
            };

            if response.partial
                && let Some(content) = &response.content
                && content.role == Role::Model
            {
                let text = content.text();
                if !text.is_empty() {
                    ctx.transcription_cache().push(TranscriptionEntry {
                        role: Role::Model,
                        text: Some(text),
                        data: None,
                    });
                }
            }

            if response.content.is_none()
                && response.error_code.is_none()
                && !response.interrupted
                && !response.turn_complete
            {
                continue;
            }

            let mut event = ctx.agent.new_event(&ctx).with_partial(response.partial);
            event.content = response.content.clone();
            event.turn_complete = response.turn_complete;
            event.interrupted = response.interrupted;
            event.error_code = response.error_code.clone();
            event.error_message = response.error_message.clone();
            if let Some(content) = &mut event.content {
                populate_client_function_call_ids(content);
            }
            event.long_running_tool_ids =
                function_calls::long_running_tool_ids(&event, &request.tools);
            yield Ok(event.clone());

            if event.partial || event.function_calls().is_empty() {
                continue;
            }

            let response_event =
                match handle_function_calls_live(&ctx, &llm_agent, &event, &request.tools).await {
                    Ok(response_event) => response_event,
                    Err(e) => {
                        sender.abort();
                        abort_streaming_tools(&ctx);
                        yield Err(e);
                        return;
                    }
                };
            let Some(response_event) = response_event else {
                continue;
            };

            if !response_event.actions.requested_auth_configs.is_empty() {
                match generate_auth_event(&ctx, &response_event) {
                    Ok(Some(auth_event)) => yield Ok(auth_event),
                    Ok(None) => {}
                    Err(e) => {
                        sender.abort();
                        abort_streaming_tools(&ctx);
                        yield Err(e);
                        return;
                    }
                }
            }

            let transfer_target = response_event.actions.transfer_to_agent.clone();
            let task_completed = response_event
                .function_responses()
                .iter()
                .any(|r| r.name == TASK_COMPLETED_TOOL_NAME);
            yield Ok(response_event);

            if let Some(target_name) = transfer_target {
                sender.abort();
                abort_streaming_tools(&ctx);
                let _ = connection.close().await;
                let root = ctx.agent.root_agent();
                let Some(target) = root.find_agent(&target_name) else {
                    yield Err(AgentError::AgentNotFound { name: target_name });
                    return;
                };
                debug!(from = %ctx.agent.name(), to = %target.name(), "live transfer");
                let mut spliced = target.run_live(&ctx);
                while let Some(item) = spliced.next().await {
                    let is_err = item.is_err();
                    yield item;
                    if is_err {
                        return;
                    }
                }
                return;
            }
            if task_completed {
                debug!(agent = %ctx.agent.name(), "task completed; closing live turn");
                sender.abort();
                abort_streaming_tools(&ctx);
                let _ = connection.close().await;
                return;
            }
        }

        sender.abort();
        abort_streaming_tools(&ctx);
    })
}

/// Live-mode function handling: `stop_streaming` and streaming tools are
/// intercepted; everything else goes through the normal single-call path.
async fn handle_function_calls_live(
    ctx: &InvocationContext,
    llm_agent: &crate::agent::LlmAgent,
    event: &Event,
    tools: &std::collections::HashMap<String, Arc<dyn Tool>>,
) -> Result<Option<Event>> {
    let calls: Vec<FunctionCall> = event.function_calls().into_iter().cloned().collect();
    let mut events = Vec::new();
    for call in &calls {
        if call.name == STOP_STREAMING_TOOL_NAME {
            events.push(handle_stop_streaming(ctx, call).await);
            continue;
        }
        let tool = tools.get(&call.name).ok_or_else(|| AgentError::ToolNotFound {
            name: call.name.clone(),
        })?;
        if let Some(streaming) = tool.as_streaming() {
            start_streaming_tool(ctx, streaming, call);
            continue;
        }
        if let Some(response_event) = execute_single_call(ctx, llm_agent, call, tools).await? {
            events.push(response_event);
        }
    }
    if events.is_empty() {
        return Ok(None);
    }
    Ok(Some(merge_parallel_function_response_events(&events)))
}

/// Spawn the background task piping a streaming tool's results into the
/// live request queue as user turns.
fn start_streaming_tool(
    ctx: &InvocationContext,
    tool: &StreamingFunctionTool,
    call: &FunctionCall,
) {
    let Some(queue) = ctx.live_request_queue.clone() else {
        return;
    };
    let name = tool.name().to_string();
    let mut results = tool.stream(call.args.clone());
    debug!(tool = %name, "starting streaming tool");
    let task_name = name.clone();
    let task = tokio::spawn(async move {
        while let Some(item) = results.next().await {
            match item {
                Ok(map) => queue.send_content(Content::user(vec![Part::function_response(
                    None,
                    task_name.clone(),
                    map,
                )])),
                Err(e) => {
                    warn!(tool = %task_name, error = %e, "streaming tool failed");
                    break;
                }
            }
        }
    });
    ctx.active_streaming_tools
        .lock()
        .expect("streaming tool table poisoned")
        .insert(name, ActiveStreamingTool { task });
}

/// Cancel a streaming tool by name, reporting the outcome.
async fn handle_stop_streaming(ctx: &InvocationContext, call: &FunctionCall) -> Event {
    let function_name = call
        .args
        .get("function_name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    let removed = ctx
        .active_streaming_tools
        .lock()
        .expect("streaming tool table poisoned")
        .remove(&function_name);

    let status = match removed {
        None => "not_found",
        Some(active) if active.task.is_finished() => "done",
        Some(active) => {
            active.task.abort();
            match tokio::time::timeout(Duration::from_secs(1), active.task).await {
                Ok(_) => "cancelled",
                Err(_) => "timed_out",
            }
        }
    };

    let mut response = JsonMap::new();
    response.insert("function_name".to_string(), function_name.into());
    response.insert("status".to_string(), status.into());
    let mut event = ctx.agent.new_event(ctx);
    event.content = Some(Content::user(vec![Part::function_response(
        call.id.clone(),
        STOP_STREAMING_TOOL_NAME,
        response,
    )]));
    event
}

/// Abort every streaming-tool task still registered for this run.
fn abort_streaming_tools(ctx: &InvocationContext) {
    let mut table = ctx
        .active_streaming_tools
        .lock()
        .expect("streaming tool table poisoned");
    for (_, active) in table.drain() {
        active.task.abort();
    }
}
