//! Selects the model and copies generation and live-connect settings.

use async_trait::async_trait;

use crate::agent::ModelRef;
use crate::context::InvocationContext;
use crate::error::Result;
use crate::event::Event;
use crate::flow::LlmRequestProcessor;
use crate::model::LlmRequest;

/// The first request processor of every flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicProcessor;

#[async_trait]
impl LlmRequestProcessor for BasicProcessor {
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>> {
        let Some(llm_agent) = ctx.agent.as_llm_agent() else {
            return Ok(Vec::new());
        };

        request.model = Some(match &llm_agent.model {
            Some(ModelRef::Instance(llm)) => llm.model_name().to_string(),
            Some(ModelRef::Named(name)) => name.clone(),
            None => llm_agent
                .canonical_model(&ctx.agent)?
                .model_name()
                .to_string(),
        });

        if let Some(config) = llm_agent.generate_content_config() {
            request.config = config.clone();
        }
        if let Some(schema) = llm_agent.output_schema() {
            request.set_output_schema(schema.clone());
        }
        request.live_connect_config.response_modalities =
            ctx.run_config.response_modalities.clone();

        Ok(Vec::new())
    }
}
