//! Natural-language planning: instruction injection on the request side,
//! thought marking on the response side.

use async_trait::async_trait;

use crate::content::Part;
use crate::context::{CallbackContext, InvocationContext, ReadonlyContext};
use crate::error::Result;
use crate::event::Event;
use crate::flow::{LlmRequestProcessor, LlmResponseProcessor};
use crate::model::{LlmRequest, LlmResponse};

/// Injects the planner's instruction and hides prior thoughts from the
/// model.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanningRequestProcessor;

#[async_trait]
impl LlmRequestProcessor for PlanningRequestProcessor {
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>> {
        let Some(planner) = ctx.agent.as_llm_agent().and_then(|llm| llm.planner.clone()) else {
            return Ok(Vec::new());
        };

        let rctx = ReadonlyContext::new(ctx);
        if let Some(instruction) = planner.build_planning_instruction(&rctx, request) {
            request.append_instructions([instruction]);
        }
        for content in &mut request.contents {
            unmark_thoughts(&mut content.parts);
        }
        Ok(Vec::new())
    }
}

/// Runs the planner's response postprocessing; emits a state-update event
/// when the planner staged one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanningResponseProcessor;

#[async_trait]
impl LlmResponseProcessor for PlanningResponseProcessor {
    async fn run(&self, ctx: &InvocationContext, response: &mut LlmResponse) -> Result<Vec<Event>> {
        if response.partial {
            return Ok(Vec::new());
        }
        let Some(planner) = ctx.agent.as_llm_agent().and_then(|llm| llm.planner.clone()) else {
            return Ok(Vec::new());
        };
        let Some(content) = &mut response.content else {
            return Ok(Vec::new());
        };

        let cb_ctx = CallbackContext::new(ctx);
        if let Some(processed) = planner.process_planning_response(&cb_ctx, &content.parts) {
            content.parts = processed;
        }

        let actions = cb_ctx.take_actions();
        if actions.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ctx.agent.new_event(ctx).with_actions(actions)])
    }
}

/// Strip thought flags so planning text is not echoed back to the model.
fn unmark_thoughts(parts: &mut [Part]) {
    for part in parts {
        if let Part::Text { thought, .. } = part {
            *thought = false;
        }
    }
}
