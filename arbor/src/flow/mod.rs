//! The LLM flow: a configurable chain of request processors, the model
//! call, and response processors.
//!
//! `run` loops single steps until a final response. One step preprocesses
//! the request (processors, then every tool's `process_llm_request`),
//! calls the model (unary or streamed, wrapped in first-wins before/after
//! model callbacks), then postprocesses each response: response
//! processors, model-event finalization, function-call dispatch, and —
//! when a tool requested it — transfer to another agent, whose stream is
//! spliced into the output.

pub(crate) mod function_calls;
mod live;
pub mod processors;

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt as _;
use tracing::{debug, warn};

use crate::agent::LlmAgent;
use crate::agent::callbacks::{run_after_model_callbacks, run_before_model_callbacks};
use crate::context::{CallbackContext, InvocationContext, StreamingMode};
use crate::error::{AgentError, Result};
use crate::event::{Event, EventStream};
use crate::model::{LlmRequest, LlmResponse};
use crate::tool::ToolContext;

/// Mutates the outgoing request; may emit supplementary events.
#[async_trait]
pub trait LlmRequestProcessor: Send + Sync {
    /// Run the processor.
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>>;
}

/// Mutates an incoming response; may emit supplementary events.
#[async_trait]
pub trait LlmResponseProcessor: Send + Sync {
    /// Run the processor.
    async fn run(&self, ctx: &InvocationContext, response: &mut LlmResponse)
    -> Result<Vec<Event>>;
}

/// A request-processor / model-call / response-processor pipeline.
pub struct LlmFlow {
    request_processors: Vec<Arc<dyn LlmRequestProcessor>>,
    response_processors: Vec<Arc<dyn LlmResponseProcessor>>,
}

impl std::fmt::Debug for LlmFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmFlow")
            .field("request_processors", &self.request_processors.len())
            .field("response_processors", &self.response_processors.len())
            .finish()
    }
}

impl LlmFlow {
    /// The flow for agents that cannot transfer: no transfer
    /// advertisement.
    #[must_use]
    pub fn single() -> Arc<Self> {
        Arc::new(Self {
            request_processors: vec![
                Arc::new(processors::basic::BasicProcessor),
                Arc::new(processors::auth_preprocessor::AuthPreprocessor),
                Arc::new(processors::instructions::InstructionsProcessor),
                Arc::new(processors::identity::IdentityProcessor),
                Arc::new(processors::contents::ContentsProcessor),
                Arc::new(processors::planning::PlanningRequestProcessor),
                Arc::new(processors::code_execution::CodeExecutionRequestProcessor),
            ],
            response_processors: vec![
                Arc::new(processors::planning::PlanningResponseProcessor),
                Arc::new(processors::code_execution::CodeExecutionResponseProcessor),
            ],
        })
    }

    /// The flow for agents that can transfer: `single` plus the transfer
    /// advertisement processor. The order is load-bearing.
    #[must_use]
    pub fn auto() -> Arc<Self> {
        Arc::new(Self {
            request_processors: vec![
                Arc::new(processors::basic::BasicProcessor),
                Arc::new(processors::auth_preprocessor::AuthPreprocessor),
                Arc::new(processors::instructions::InstructionsProcessor),
                Arc::new(processors::identity::IdentityProcessor),
                Arc::new(processors::contents::ContentsProcessor),
                Arc::new(processors::planning::PlanningRequestProcessor),
                Arc::new(processors::code_execution::CodeExecutionRequestProcessor),
                Arc::new(processors::agent_transfer::AgentTransferProcessor),
            ],
            response_processors: vec![
                Arc::new(processors::planning::PlanningResponseProcessor),
                Arc::new(processors::code_execution::CodeExecutionResponseProcessor),
            ],
        })
    }

    /// Loop single steps until a final response, an error, or an empty
    /// step.
    pub fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        Box::pin(stream! {
            loop {
                let mut last_event: Option<Event> = None;
                let mut step = Arc::clone(&self).run_one_step(ctx.clone());
                while let Some(item) = step.next().await {
                    match item {
                        Ok(event) => {
                            last_event = Some(event.clone());
                            yield Ok(event);
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                match &last_event {
                    None => break,
                    Some(event) => {
                        if event.error_code.is_some() || event.is_final_response() {
                            break;
                        }
                    }
                }
                if ctx.is_ended() {
                    break;
                }
            }
        })
    }

    /// Run in live (bidirectional) mode.
    pub fn run_live(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        live::run_live(self, ctx)
    }

    /// One request → model → responses step.
    fn run_one_step(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        Box::pin(stream! {
            let llm_agent = match ctx.agent.as_llm_agent() {
                Some(llm) => llm.clone(),
                None => {
                    yield Err(AgentError::internal(format!(
                        "flow invoked on non-LLM agent '{}'",
                        ctx.agent.name()
                    )));
                    return;
                }
            };

            let mut request = LlmRequest::new();
            match Arc::clone(&self).preprocess(&ctx, &llm_agent, &mut request).await {
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

            // Model call.
            let llm = match llm_agent.canonical_model(&ctx.agent) {
                Ok(llm) => llm,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if let Err(e) = ctx.increment_llm_call_count() {
                yield Err(e);
                return;
            }

            let cb_ctx = CallbackContext::new(&ctx);
            let override_response = match run_before_model_callbacks(
                &llm_agent.before_model_callbacks,
                &cb_ctx,
                &mut request,
            )
            .await
            {
                Ok(response) => response,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let request = Arc::new(request);
            if let Some(response) = override_response {
                debug!(agent = %ctx.agent.name(), "before-model callback supplied the response");
                let mut post = Arc::clone(&self).postprocess(
                    ctx.clone(),
                    llm_agent.clone(),
                    Arc::clone(&request),
                    response,
                );
                while let Some(item) = post.next().await {
                    let is_err = item.is_err();
                    yield item;
                    if is_err {
                        return;
                    }
                }
                return;
            }

            debug!(agent = %ctx.agent.name(), model = %llm.model_name(), "calling model");
            match ctx.run_config.streaming_mode {
                StreamingMode::Sse => {
                    let mut responses = match llm.generate_content_stream(&request).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    while let Some(item) = responses.next().await {
                        let response = match item {
                            Ok(response) => response,
                            Err(e) => {
                                warn!(error = %e, "model stream failed");
                                yield Err(e);
                                return;
                            }
                        };
                        let response = match run_after_model_callbacks(
                            &llm_agent.after_model_callbacks,
                            &cb_ctx,
                            &response,
                        )
                        .await
                        {
                            Ok(Some(replacement)) => replacement,
                            Ok(None) => response,
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        };
                        let mut post = Arc::clone(&self).postprocess(
                            ctx.clone(),
                            llm_agent.clone(),
                            Arc::clone(&request),
                            response,
                        );
                        while let Some(item) = post.next().await {
                            let is_err = item.is_err();
                            yield item;
                            if is_err {
                                return;
                            }
                        }
                    }
                }
                StreamingMode::None | StreamingMode::Bidi => {
                    let response = match llm.generate_content(&request).await {
                        Ok(response) => response,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    let response = match run_after_model_callbacks(
                        &llm_agent.after_model_callbacks,
                        &cb_ctx,
                        &response,
                    )
                    .await
                    {
                        Ok(Some(replacement)) => replacement,
                        Ok(None) => response,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    let mut post = Arc::clone(&self).postprocess(
                        ctx.clone(),
                        llm_agent.clone(),
                        Arc::clone(&request),
                        response,
                    );
                    while let Some(item) = post.next().await {
                        let is_err = item.is_err();
                        yield item;
                        if is_err {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Run request processors, then every tool's `process_llm_request`.
    async fn preprocess(
        self: Arc<Self>,
        ctx: &InvocationContext,
        llm_agent: &LlmAgent,
        request: &mut LlmRequest,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for processor in &self.request_processors {
            events.extend(processor.run(ctx, request).await?);
            if ctx.is_ended() {
                return Ok(events);
            }
        }

        let rctx = crate::context::ReadonlyContext::new(ctx);
        for tool in llm_agent.canonical_tools(&rctx).await? {
            let tool_ctx = ToolContext::new(ctx, "");
            request.tools.insert(tool.name().to_string(), Arc::clone(&tool));
            tool.process_llm_request(&tool_ctx, request).await?;
        }
        Ok(events)
    }

    /// Response processors, model-event finalization, function dispatch,
    /// transfer splice.
    fn postprocess(
        self: Arc<Self>,
        ctx: InvocationContext,
        llm_agent: LlmAgent,
        request: Arc<LlmRequest>,
        mut response: LlmResponse,
    ) -> EventStream {
        Box::pin(stream! {
            for processor in &self.response_processors {
                match processor.run(&ctx, &mut response).await {
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
            }

            if response.content.is_none()
                && response.error_code.is_none()
                && !response.interrupted
                && !response.turn_complete
            {
                return;
            }

            let mut event = ctx.agent.new_event(&ctx).with_partial(response.partial);
            event.content = response.content.clone();
            event.turn_complete = response.turn_complete;
            event.interrupted = response.interrupted;
            event.error_code = response.error_code.clone();
            event.error_message = response.error_message.clone();
            if let Some(content) = &mut event.content {
                function_calls::populate_client_function_call_ids(content);
            }
            event.long_running_tool_ids =
                function_calls::long_running_tool_ids(&event, &request.tools);
            yield Ok(event.clone());

            if event.partial || event.function_calls().is_empty() {
                return;
            }

            let response_event = match function_calls::handle_function_calls(
                &ctx,
                &llm_agent,
                &event,
                &request.tools,
                None,
            )
            .await
            {
                Ok(event) => event,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let Some(response_event) = response_event else {
                return;
            };

            if !response_event.actions.requested_auth_configs.is_empty() {
                match function_calls::generate_auth_event(&ctx, &response_event) {
                    Ok(Some(auth_event)) => yield Ok(auth_event),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let transfer_target = response_event.actions.transfer_to_agent.clone();
            yield Ok(response_event);

            if let Some(target_name) = transfer_target {
                let root = ctx.agent.root_agent();
                let Some(target) = root.find_agent(&target_name) else {
                    yield Err(AgentError::AgentNotFound { name: target_name });
                    return;
                };
                debug!(from = %ctx.agent.name(), to = %target.name(), "transferring control");
                let mut spliced = target.run(&ctx);
                while let Some(item) = spliced.next().await {
                    let is_err = item.is_err();
                    yield item;
                    if is_err {
                        return;
                    }
                }
            }
        })
    }
}
