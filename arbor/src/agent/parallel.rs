//! The parallel agent: children run concurrently, streams merged fairly.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt as _;
use tokio::sync::mpsc;
use tracing::debug;

use crate::context::InvocationContext;
use crate::event::{EventItem, EventStream};

use super::Agent;

/// Run every child concurrently with its branch extended by its own name,
/// merging the streams through [`merge_agent_run`].
pub(super) fn execute(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    let children: Vec<(Arc<Agent>, InvocationContext)> = agent
        .sub_agents()
        .iter()
        .map(|child| (Arc::clone(child), ctx.with_branch_child(child.name())))
        .collect();
    merge_agent_run(children)
}

/// Fair merge of child event streams.
///
/// One producer task per child hands each item through a bounded(1)
/// rendezvous channel; a producer does not advance past an item until the
/// consumer has accepted it. The channel doubles as the cancellation
/// signal: when the consumer stops pulling and the receiver drops, every
/// producer's pending send fails and the producer returns. No item is
/// delivered after the consumer has stopped, because delivery is the
/// rendezvous.
///
/// Within one child, relative order is preserved; across children the
/// interleaving is arbitrary.
pub(crate) fn merge_agent_run(children: Vec<(Arc<Agent>, InvocationContext)>) -> EventStream {
    Box::pin(stream! {
        let (tx, mut rx) = mpsc::channel::<EventItem>(1);
        let mut tasks = Vec::with_capacity(children.len());
        for (child, child_ctx) in children {
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                let mut child_stream = child.run(&child_ctx);
                while let Some(item) = child_stream.next().await {
                    if tx.send(item).await.is_err() {
                        debug!(agent = %child.name(), "merge consumer stopped; producer exiting");
                        return;
                    }
                }
            }));
        }
        drop(tx);

        while let Some(item) = rx.recv().await {
            let is_err = item.is_err();
            yield item;
            if is_err {
                break;
            }
        }
        drop(rx);

        for task in tasks {
            let _ = task.await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunConfig;
    use crate::session::{InMemorySessionService, Session};
    use crate::content::JsonMap;

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
    async fn test_zero_children_completes_cleanly() {
        let agent = Agent::parallel("fan", Vec::new()).expect("agent");
        let ctx = ctx_for(&agent);
        let events: Vec<_> = agent.run(&ctx).collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_merge_of_single_child_is_identity() {
        let child = Agent::sequential("only", Vec::new()).expect("child");
        let agent = Agent::parallel("fan", vec![child]).expect("agent");
        let ctx = ctx_for(&agent);
        let events: Vec<_> = agent.run(&ctx).collect().await;
        // A childless sequential child yields nothing; the merge must add
        // nothing of its own.
        assert!(events.is_empty());
    }
}
