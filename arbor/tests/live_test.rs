//! Integration tests for live (bidirectional) mode.

#![allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]

use std::sync::Arc;

use futures::StreamExt as _;
use serde_json::json;

use arbor::model::mock::MockLlm;
use arbor::prelude::*;

fn live_script(text: &str, completion_id: &str) -> Vec<LlmResponse> {
    vec![
        LlmResponse::new(Content::model_text(text)),
        LlmResponse::new(Content::model(vec![Part::FunctionCall(FunctionCall {
            id: Some(completion_id.to_string()),
            name: "task_completed".to_string(),
            args: JsonMap::new(),
        })])),
    ]
}

/// A sequential agent in live mode advances to the next child when the
/// current child's model calls `task_completed`.
#[tokio::test]
async fn test_sequential_live_advances_on_task_completed() {
    let agent_a = LlmAgentBuilder::new("a")
        .model(Arc::new(MockLlm::scripted("mock-a", live_script("A live", "tc1"))))
        .build()
        .expect("agent a");
    let agent_b = LlmAgentBuilder::new("b")
        .model(Arc::new(MockLlm::scripted("mock-b", live_script("B live", "tc2"))))
        .build()
        .expect("agent b");
    let seq = Agent::sequential("pair", vec![agent_a, agent_b]).expect("seq");

    let sessions = Arc::new(InMemorySessionService::new());
    sessions
        .create_session("test", "u", JsonMap::new(), Some("s1".to_string()))
        .await
        .expect("session");
    let runner = Runner::new("test", seq, sessions).expect("runner");

    let queue = LiveRequestQueue::new();
    let mut stream = runner.run_live("u", "s1", queue, RunConfig::default());

    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        events.push(item.expect("event"));
    }

    let authors: Vec<_> = events.iter().map(|e| e.author.clone()).collect();
    assert_eq!(authors, vec!["a", "a", "a", "b", "b", "b"]);

    // Per child: the text event, the sentinel call, its response.
    assert_eq!(events[0].content.as_ref().expect("content").text(), "A live");
    assert_eq!(events[1].function_calls()[0].name, "task_completed");
    let sentinel_response = &events[2];
    assert_eq!(
        sentinel_response.function_responses()[0].response.get("status"),
        Some(&json!("ok"))
    );
    assert_eq!(events[3].content.as_ref().expect("content").text(), "B live");
}

/// Loop agents do not support live mode.
#[tokio::test]
async fn test_loop_live_is_not_implemented() {
    let child = LlmAgentBuilder::new("worker")
        .model(Arc::new(MockLlm::text("mock", "hi")))
        .build()
        .expect("child");
    let looped = Agent::looping("looper", vec![child], 1).expect("loop");

    let sessions = Arc::new(InMemorySessionService::new());
    sessions
        .create_session("test", "u", JsonMap::new(), Some("s1".to_string()))
        .await
        .expect("session");
    let runner = Runner::new("test", looped, sessions).expect("runner");

    let queue = LiveRequestQueue::new();
    let mut stream = runner.run_live("u", "s1", queue, RunConfig::default());

    let first = stream.next().await.expect("item");
    assert!(matches!(first, Err(AgentError::NotImplemented { .. })));
}
