//! Advertises eligible transfer targets and the `transfer_to_agent` tool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::Agent;
use crate::context::InvocationContext;
use crate::error::Result;
use crate::event::Event;
use crate::flow::LlmRequestProcessor;
use crate::model::LlmRequest;
use crate::tool::{TRANSFER_TO_AGENT_TOOL_NAME, transfer_to_agent_tool};

/// The last request processor of the auto flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentTransferProcessor;

#[async_trait]
impl LlmRequestProcessor for AgentTransferProcessor {
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>> {
        let targets = transfer_targets(ctx);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut instruction = String::from(
            "You have a list of other agents to transfer to:\n\n",
        );
        for target in &targets {
            instruction.push_str(&format!(
                "Agent name: {}\nAgent description: {}\n\n",
                target.name(),
                target.description()
            ));
        }
        instruction.push_str(&format!(
            "If you are the best agent to handle the request according to your \
description, answer it directly. Otherwise call the `{TRANSFER_TO_AGENT_TOOL_NAME}` \
function with the name of the agent that should take over. When another agent \
is better suited, prefer transferring over answering poorly."
        ));
        if ctx.agent.parent().is_some() {
            instruction.push_str(&format!(
                " Your parent agent is {}. If neither you nor the other agents are \
suitable, transfer to your parent agent.",
                ctx.agent
                    .parent()
                    .map(|p| p.name().to_string())
                    .unwrap_or_default()
            ));
        }
        request.append_instructions([instruction]);
        request.append_tool(transfer_to_agent_tool());
        Ok(Vec::new())
    }
}

/// Eligible targets: sub-agents unconditionally; the parent when it is an
/// LLM agent and parent transfer is allowed; peers when the parent is an
/// LLM agent and peer transfer is allowed.
fn transfer_targets(ctx: &InvocationContext) -> Vec<Arc<Agent>> {
    let node = &ctx.agent;
    let Some(llm) = node.as_llm_agent() else {
        return Vec::new();
    };

    let mut targets: Vec<Arc<Agent>> = node.sub_agents().to_vec();
    if let Some(parent) = node.parent()
        && parent.as_llm_agent().is_some()
    {
        if !llm.disallow_transfer_to_parent {
            targets.push(Arc::clone(&parent));
        }
        if !llm.disallow_transfer_to_peers {
            targets.extend(
                parent
                    .sub_agents()
                    .iter()
                    .filter(|peer| peer.name() != node.name())
                    .cloned(),
            );
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LlmAgentBuilder;
    use crate::content::JsonMap;
    use crate::context::RunConfig;
    use crate::model::mock::MockLlm;
    use crate::session::{InMemorySessionService, Session};

    fn family() -> (Arc<Agent>, Arc<Agent>) {
        let child_a = LlmAgentBuilder::new("support")
            .description("Handles support questions.")
            .build()
            .expect("child");
        let child_b = LlmAgentBuilder::new("billing")
            .description("Handles billing questions.")
            .build()
            .expect("child");
        let parent = LlmAgentBuilder::new("front_desk")
            .model(Arc::new(MockLlm::text("mock", "hi")))
            .sub_agents(vec![Arc::clone(&child_a), child_b])
            .build()
            .expect("parent");
        (parent, child_a)
    }

    fn ctx_for(agent: &Arc<Agent>) -> InvocationContext {
        let session = Arc::new(Session::new("s1", "app", "u", JsonMap::new()));
        InvocationContext::new(
            Arc::clone(agent),
            session,
            Arc::new(InMemorySessionService::new()),
            RunConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_child_sees_parent_and_peer() {
        let (_parent, child) = family();
        let ctx = ctx_for(&child);
        let names: Vec<String> = transfer_targets(&ctx)
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["front_desk", "billing"]);
    }

    #[tokio::test]
    async fn test_parent_sees_children() {
        let (parent, _child) = family();
        let ctx = ctx_for(&parent);
        let names: Vec<String> = transfer_targets(&ctx)
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["support", "billing"]);
    }

    #[tokio::test]
    async fn test_processor_advertises_tool() {
        let (parent, _) = family();
        let ctx = ctx_for(&parent);
        let mut request = LlmRequest::new();
        AgentTransferProcessor.run(&ctx, &mut request).await.expect("run");
        assert!(request.tools.contains_key(TRANSFER_TO_AGENT_TOOL_NAME));
        assert!(request.system_instruction().contains("billing"));
    }
}
