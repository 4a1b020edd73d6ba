//! The loop agent: repeats its children until escalation or a cap.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt as _;
use tracing::debug;

use crate::context::InvocationContext;
use crate::event::EventStream;

use super::Agent;

/// Run each child in order, repeatedly. Stops when a child emits an event
/// with `actions.escalate`, when `max_iterations` full passes complete
/// (0 = unbounded), or on error. The escalating event itself is yielded;
/// nothing after it is.
pub(super) fn execute(
    agent: Arc<Agent>,
    ctx: InvocationContext,
    max_iterations: usize,
) -> EventStream {
    Box::pin(stream! {
        let mut passes = 0usize;
        'outer: loop {
            for child in agent.sub_agents().to_vec() {
                let mut child_stream = child.run(&ctx);
                while let Some(item) = child_stream.next().await {
                    let is_err = item.is_err();
                    let escalated =
                        matches!(&item, Ok(event) if event.actions.escalate);
                    yield item;
                    if is_err {
                        break 'outer;
                    }
                    if escalated {
                        debug!(agent = %agent.name(), "loop escalated");
                        break 'outer;
                    }
                }
                if ctx.is_ended() {
                    break 'outer;
                }
            }
            passes += 1;
            if max_iterations > 0 && passes >= max_iterations {
                debug!(agent = %agent.name(), passes, "loop iteration cap reached");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Content, JsonMap};
    use crate::context::{CallbackContext, RunConfig};
    use crate::error::Result;
    use crate::session::{InMemorySessionService, Session};

    fn ctx_for(agent: &Arc<Agent>) -> InvocationContext {
        let session = Arc::new(Session::new("s1", "app", "u", JsonMap::new()));
        InvocationContext::new(
            Arc::clone(agent),
            session,
            Arc::new(InMemorySessionService::new()),
            RunConfig::default(),
        )
    }

    /// A child that emits one text event per run via its before callback.
    fn noisy_child(name: &str) -> Arc<Agent> {
        Agent::builder(name)
            .before_agent(|_: &CallbackContext| -> Result<Option<Content>> {
                Ok(Some(Content::model_text("tick")))
            })
            .sequential()
            .expect("child")
    }

    #[tokio::test]
    async fn test_cap_counts_full_passes_over_children() {
        let looped = Agent::looping("looper", vec![noisy_child("a"), noisy_child("b")], 3)
            .expect("loop");
        let ctx = ctx_for(&looped);
        let events: Vec<_> = looped.run(&ctx).collect().await;
        // 3 passes x 2 children, one event each.
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn test_unbounded_loop_stops_on_escalation() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_cb = Arc::clone(&runs);
        let child = Agent::builder("escalator")
            .before_agent(move |ctx: &CallbackContext| -> Result<Option<Content>> {
                let n = runs_cb.fetch_add(1, Ordering::SeqCst);
                if n == 4 {
                    ctx.with_actions(|a| a.escalate = true);
                }
                Ok(Some(Content::model_text(format!("run {n}"))))
            })
            .sequential()
            .expect("child");
        let looped = Agent::looping("looper", vec![child], 0).expect("loop");
        let ctx = ctx_for(&looped);
        let events: Vec<_> = looped.run(&ctx).collect().await;
        assert_eq!(events.len(), 5);
        assert!(events[4].as_ref().expect("event").actions.escalate);
    }
}
