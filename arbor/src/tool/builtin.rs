//! Built-in tools with reserved names.

use serde_json::json;
use std::sync::Arc;

use crate::content::JsonMap;

use super::{FunctionTool, Tool, ToolContext};

/// Reserved name of the agent-transfer tool.
pub const TRANSFER_TO_AGENT_TOOL_NAME: &str = "transfer_to_agent";

/// Reserved name of the loop-exit tool.
pub const EXIT_LOOP_TOOL_NAME: &str = "exit_loop";

/// Reserved name of the live end-of-turn sentinel tool.
pub const TASK_COMPLETED_TOOL_NAME: &str = "task_completed";

/// The tool the auto flow advertises for routing control to another
/// agent. Its invocation sets `actions.transfer_to_agent`.
#[must_use]
pub fn transfer_to_agent_tool() -> Arc<dyn Tool> {
    Arc::new(
        FunctionTool::new(
            TRANSFER_TO_AGENT_TOOL_NAME,
            "Transfer the conversation to another agent.",
            |args: JsonMap, ctx: &ToolContext| {
                if let Some(name) = args.get("agent_name").and_then(|v| v.as_str()) {
                    ctx.transfer_to_agent(name);
                }
                Ok(JsonMap::new())
            },
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "description": "Name of the agent to transfer to."
                }
            },
            "required": ["agent_name"]
        })),
    )
}

/// A tool that terminates the nearest enclosing loop agent by setting
/// `actions.escalate`.
#[must_use]
pub fn exit_loop_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        EXIT_LOOP_TOOL_NAME,
        "Exit the current loop. Call when the task is done and no further iterations are needed.",
        |_args: JsonMap, ctx: &ToolContext| {
            ctx.escalate();
            Ok(JsonMap::new())
        },
    ))
}

/// The sentinel tool sequential agents give their children in live mode;
/// the flow treats its response as the end-of-turn signal.
#[must_use]
pub fn task_completed_tool() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        TASK_COMPLETED_TOOL_NAME,
        "Signal that you have completed the current task.",
        |_args: JsonMap, _ctx: &ToolContext| {
            let mut out = JsonMap::new();
            out.insert("status".to_string(), json!("ok"));
            Ok(out)
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::context::{InvocationContext, RunConfig};
    use crate::session::{InMemorySessionService, Session};

    fn tool_ctx() -> ToolContext {
        let agent = Agent::sequential("root", Vec::new()).expect("agent");
        let session = Arc::new(Session::new("s1", "app", "u", JsonMap::new()));
        let ctx = InvocationContext::new(
            agent,
            session,
            Arc::new(InMemorySessionService::new()),
            RunConfig::default(),
        );
        ToolContext::new(&ctx, "call-1")
    }

    #[tokio::test]
    async fn test_transfer_tool_sets_action() {
        let tool = transfer_to_agent_tool();
        let ctx = tool_ctx();
        let mut args = JsonMap::new();
        args.insert("agent_name".to_string(), json!("billing"));
        tool.run(args, &ctx).await.expect("run");
        assert_eq!(ctx.actions().transfer_to_agent.as_deref(), Some("billing"));
    }

    #[tokio::test]
    async fn test_exit_loop_tool_escalates() {
        let tool = exit_loop_tool();
        let ctx = tool_ctx();
        tool.run(JsonMap::new(), &ctx).await.expect("run");
        assert!(ctx.actions().escalate);
    }
}
