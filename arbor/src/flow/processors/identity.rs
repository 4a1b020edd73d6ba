//! Tells the model who it is.

use async_trait::async_trait;

use crate::context::InvocationContext;
use crate::error::Result;
use crate::event::Event;
use crate::flow::LlmRequestProcessor;
use crate::model::LlmRequest;

/// Appends a short system message stating the agent's name and
/// description.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProcessor;

#[async_trait]
impl LlmRequestProcessor for IdentityProcessor {
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>> {
        let mut instruction = format!(
            "You are an agent. Your internal name is \"{}\".",
            ctx.agent.name()
        );
        let description = ctx.agent.description();
        if !description.is_empty() {
            instruction.push_str(&format!(" The description about you is \"{description}\"."));
        }
        request.append_instructions([instruction]);
        Ok(Vec::new())
    }
}
