//! The sequential agent: children run in declaration order.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt as _;

use crate::context::InvocationContext;
use crate::event::EventStream;
use crate::tool::task_completed_tool;

use super::Agent;

/// Instruction prepended to child LLM agents in live mode so the flow can
/// detect end of turn from streaming output.
const TASK_COMPLETED_INSTRUCTION: &str = "When you finish the task assigned to you, \
call the `task_completed` function to hand control back. Do not keep the turn open \
after calling it.";

/// Yield each child's full event stream before advancing to the next.
/// An error item stops iteration; a cooperative stop ends cleanly.
pub(super) fn execute(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    Box::pin(stream! {
        for child in agent.sub_agents().to_vec() {
            let mut child_stream = child.run(&ctx);
            while let Some(item) = child_stream.next().await {
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
            if ctx.is_ended() {
                return;
            }
        }
    })
}

/// Live-mode execution.
///
/// Streaming audio/video gives no end-of-turn marker, so each child LLM
/// agent is instrumented with the `task_completed` sentinel tool and an
/// instruction to call it when done. The instrumentation operates on a
/// per-invocation copy of the child so repeated runs never accumulate
/// sentinel tools on the configured tree.
pub(super) fn execute_live(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    Box::pin(stream! {
        for child in agent.sub_agents().to_vec() {
            let instrumented = instrument_for_live(&child);
            let mut child_stream = instrumented.run_live(&ctx);
            while let Some(item) = child_stream.next().await {
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }
            if ctx.is_ended() {
                return;
            }
        }
    })
}

/// Copy a child LLM agent with the sentinel tool and instruction added;
/// non-LLM children are passed through untouched.
fn instrument_for_live(child: &Arc<Agent>) -> Arc<Agent> {
    let Some(llm) = child.as_llm_agent() else {
        return Arc::clone(child);
    };
    let instrumented = llm
        .copy_with_extra_tool(task_completed_tool())
        .with_instruction_prefix(TASK_COMPLETED_INSTRUCTION);
    super::llm_agent::detached_copy(child, instrumented)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LlmAgentBuilder;

    #[test]
    fn test_instrumentation_copies_instead_of_mutating() {
        let child = LlmAgentBuilder::new("writer")
            .model_name("mock")
            .build()
            .expect("agent");
        let before = child.as_llm_agent().expect("llm").tool_count();

        let copy = instrument_for_live(&child);
        let copy2 = instrument_for_live(&child);

        assert_eq!(child.as_llm_agent().expect("llm").tool_count(), before);
        assert_eq!(copy.as_llm_agent().expect("llm").tool_count(), before + 1);
        assert_eq!(copy2.as_llm_agent().expect("llm").tool_count(), before + 1);
    }
}
