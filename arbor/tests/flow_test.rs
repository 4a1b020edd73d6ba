//! Integration tests for the LLM flow: function-call round trips,
//! credential requests, agent transfer, output capture.

#![allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]

use std::sync::Arc;

use futures::StreamExt as _;
use serde_json::json;

use arbor::model::mock::MockLlm;
use arbor::prelude::*;

fn call_response(calls: &[(&str, &str)]) -> LlmResponse {
    let parts = calls
        .iter()
        .map(|(id, name)| {
            Part::FunctionCall(FunctionCall {
                id: Some((*id).to_string()),
                name: (*name).to_string(),
                args: JsonMap::new(),
            })
        })
        .collect();
    LlmResponse::new(Content::model(parts))
}

fn map_of(key: &str, value: serde_json::Value) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert(key.to_string(), value);
    map
}

async fn make_runner(agent: Arc<Agent>) -> (Runner, Arc<InMemorySessionService>) {
    let sessions = Arc::new(InMemorySessionService::new());
    sessions
        .create_session("test", "u", JsonMap::new(), Some("s1".to_string()))
        .await
        .expect("session");
    let runner = Runner::new(
        "test",
        agent,
        Arc::clone(&sessions) as Arc<dyn SessionService>,
    )
    .expect("runner");
    (runner, sessions)
}

async fn collect(mut stream: EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        events.push(item.expect("event"));
    }
    events
}

/// Scenario: two parallel calls produce one merged response event whose
/// parts carry the original ids, and the next model call sees both
/// responses.
#[tokio::test]
async fn test_function_call_round_trip() {
    let mock = Arc::new(MockLlm::scripted(
        "mock",
        vec![
            call_response(&[("i1", "x"), ("i2", "y")]),
            LlmResponse::new(Content::model_text("all done")),
        ],
    ));
    let tool_x = FunctionTool::new("x", "Tool x.", |_: JsonMap, _: &ToolContext| {
        Ok(map_of("r", json!(1)))
    });
    let tool_y = FunctionTool::new("y", "Tool y.", |_: JsonMap, _: &ToolContext| {
        Ok(map_of("r", json!(2)))
    });
    let agent = LlmAgentBuilder::new("caller")
        .model(Arc::clone(&mock) as Arc<dyn Llm>)
        .tools(vec![Arc::new(tool_x), Arc::new(tool_y)])
        .build()
        .expect("agent");

    let (runner, _) = make_runner(agent).await;
    let events = collect(runner.run("u", "s1", Content::user_text("go"), RunConfig::default())).await;

    assert_eq!(events.len(), 3);

    let call_event = &events[0];
    let call_ids: Vec<_> = call_event
        .function_calls()
        .iter()
        .map(|c| c.id.clone().expect("id"))
        .collect();
    assert_eq!(call_ids, vec!["i1", "i2"]);

    let merged = &events[1];
    assert_ne!(merged.id, call_event.id);
    let responses = merged.function_responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id.as_deref(), Some("i1"));
    assert_eq!(responses[0].response.get("r"), Some(&json!(1)));
    assert_eq!(responses[1].id.as_deref(), Some("i2"));
    assert_eq!(responses[1].response.get("r"), Some(&json!(2)));

    assert_eq!(
        events[2].content.as_ref().expect("content").text(),
        "all done"
    );

    // The second model call receives both responses in its request.
    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    let last_content = requests[1].contents.last().expect("contents");
    let response_parts: Vec<_> = last_content
        .parts
        .iter()
        .filter_map(Part::as_function_response)
        .collect();
    assert_eq!(response_parts.len(), 2);
}

/// Scenario: a tool that needs credentials triggers a credential-request
/// event before its own response event, and the client's answer resumes
/// exactly that call.
#[tokio::test]
async fn test_auth_request_and_resumption() {
    let mock = Arc::new(MockLlm::scripted(
        "mock",
        vec![
            call_response(&[("i1", "guarded")]),
            LlmResponse::new(Content::model_text("thanks")),
        ],
    ));
    let mut config = AuthConfig::new(json!({"type": "apiKey"}));
    config.credential_key = Some("svc".to_string());
    let tool_config = config.clone();
    let guarded = FunctionTool::new(
        "guarded",
        "Needs credentials.",
        move |_: JsonMap, ctx: &ToolContext| {
            match ctx.get_auth_response(&tool_config) {
                Some(completed) if completed.exchanged_auth_credential.is_some() => {
                    Ok(map_of("authed", json!(true)))
                }
                _ => {
                    ctx.request_credential(tool_config.clone());
                    Ok(map_of("pending", json!(true)))
                }
            }
        },
    );
    let agent = LlmAgentBuilder::new("keeper")
        .model(Arc::clone(&mock) as Arc<dyn Llm>)
        .tool(Arc::new(guarded))
        .build()
        .expect("agent");

    let (runner, _) = make_runner(agent).await;
    let first_run =
        collect(runner.run("u", "s1", Content::user_text("go"), RunConfig::default())).await;

    let auth_pos = first_run
        .iter()
        .position(|e| {
            e.function_calls()
                .iter()
                .any(|c| c.name == REQUEST_CREDENTIAL_TOOL_NAME)
        })
        .expect("auth event emitted");
    let response_pos = first_run
        .iter()
        .position(|e| {
            e.function_responses()
                .iter()
                .any(|r| r.response.contains_key("pending"))
        })
        .expect("pending response emitted");
    assert!(auth_pos < response_pos);

    let auth_event = &first_run[auth_pos];
    let auth_call = auth_event.function_calls()[0].clone();
    let auth_call_id = auth_call.id.clone().expect("auth call id");
    assert!(auth_event.long_running_tool_ids.contains(&auth_call_id));
    let args = AuthToolArguments::from_args(&auth_call.args).expect("args");
    assert_eq!(args.function_call_id, "i1");
    assert_eq!(args.auth_config.auth_scheme, json!({"type": "apiKey"}));

    // The client completes the exchange and answers the synthetic call.
    let mut completed = config;
    completed.exchanged_auth_credential = Some(json!({"token": "t0k"}));
    let answer_map = match serde_json::to_value(&completed).expect("serialize") {
        serde_json::Value::Object(map) => map,
        _ => panic!("auth config must serialize to an object"),
    };
    let answer = Content::user(vec![Part::function_response(
        Some(auth_call_id),
        REQUEST_CREDENTIAL_TOOL_NAME,
        answer_map,
    )]);

    let second_run = collect(runner.run("u", "s1", answer, RunConfig::default())).await;
    let resumed = &second_run[0];
    let responses = resumed.function_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id.as_deref(), Some("i1"));
    assert_eq!(responses[0].response.get("authed"), Some(&json!(true)));
}

/// Scenario: the model transfers to a peer; the target's events are
/// spliced in and authored by the target.
#[tokio::test]
async fn test_agent_transfer_splices_target_stream() {
    let expert = LlmAgentBuilder::new("expert")
        .description("Knows everything about rocks.")
        .model(Arc::new(MockLlm::text("mock-expert", "expert says hi")))
        .build()
        .expect("expert");
    let mut transfer_args = JsonMap::new();
    transfer_args.insert("agent_name".to_string(), json!("expert"));
    let coordinator = LlmAgentBuilder::new("coordinator")
        .model(Arc::new(MockLlm::scripted(
            "mock-root",
            vec![LlmResponse::new(Content::model(vec![Part::FunctionCall(
                FunctionCall {
                    id: Some("t1".to_string()),
                    name: "transfer_to_agent".to_string(),
                    args: transfer_args,
                },
            )]))],
        )))
        .sub_agent(expert)
        .build()
        .expect("coordinator");

    let (runner, _) = make_runner(coordinator).await;
    let events =
        collect(runner.run("u", "s1", Content::user_text("rocks?"), RunConfig::default())).await;

    let authors: Vec<_> = events.iter().map(|e| e.author.clone()).collect();
    assert_eq!(authors, vec!["coordinator", "coordinator", "expert"]);
    assert_eq!(
        events[1].actions.transfer_to_agent.as_deref(),
        Some("expert")
    );
    assert_eq!(
        events[2].content.as_ref().expect("content").text(),
        "expert says hi"
    );
}

/// The final response is captured under `output_key`.
#[tokio::test]
async fn test_output_key_saves_final_text() {
    let agent = LlmAgentBuilder::new("quizzer")
        .model(Arc::new(MockLlm::text("mock", "42")))
        .output_key("answer")
        .build()
        .expect("agent");

    let (runner, sessions) = make_runner(agent).await;
    let events =
        collect(runner.run("u", "s1", Content::user_text("answer?"), RunConfig::default())).await;

    let last = events.last().expect("final event");
    assert_eq!(last.actions.state_delta.get("answer"), Some(&json!("42")));

    let session = sessions
        .get_session("test", "u", "s1")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(session.state_get("answer"), Some(json!("42")));
}

/// Crossing the per-invocation model-call ceiling is fatal.
#[tokio::test]
async fn test_llm_call_ceiling_is_enforced() {
    let echo = FunctionTool::new("echo", "Echoes.", |_: JsonMap, _: &ToolContext| {
        Ok(map_of("ok", json!(true)))
    });
    let agent = LlmAgentBuilder::new("chatty")
        .model(Arc::new(MockLlm::scripted(
            "mock",
            vec![
                call_response(&[("i1", "echo")]),
                LlmResponse::new(Content::model_text("done")),
            ],
        )))
        .tool(Arc::new(echo))
        .build()
        .expect("agent");

    let (runner, _) = make_runner(agent).await;
    let config = RunConfig {
        max_llm_calls: 1,
        ..RunConfig::default()
    };
    let mut stream = runner.run("u", "s1", Content::user_text("go"), config);

    let mut saw_limit_error = false;
    while let Some(item) = stream.next().await {
        if let Err(AgentError::LlmCallsLimitExceeded { limit }) = item {
            assert_eq!(limit, 1);
            saw_limit_error = true;
        }
    }
    assert!(saw_limit_error);
}

/// Models registered by name resolve through the global registry.
#[tokio::test]
async fn test_named_model_resolution() {
    LlmRegistry::global().register_instance(Arc::new(MockLlm::text(
        "registry-smoke-model",
        "from the registry",
    )));
    let agent = LlmAgentBuilder::new("resolver")
        .model_name("registry-smoke-model")
        .build()
        .expect("agent");

    let (runner, _) = make_runner(agent).await;
    let events =
        collect(runner.run("u", "s1", Content::user_text("hi"), RunConfig::default())).await;
    assert_eq!(
        events.last().expect("event").content.as_ref().expect("content").text(),
        "from the registry"
    );
}
