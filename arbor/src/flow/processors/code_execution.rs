//! Code execution: data-file preprocessing on the request side, fenced
//! code-block execution on the response side.

use async_trait::async_trait;
use tracing::debug;

use crate::code_executor::{
    CodeExecutionFile, CodeExecutionInput, CodeExecutorContext, extract_code_block,
    format_execution_result,
};
use crate::content::{Blob, Content, JsonMap, Part, Role};
use crate::context::InvocationContext;
use crate::error::Result;
use crate::event::{Event, EventActions};
use crate::flow::{LlmRequestProcessor, LlmResponseProcessor};
use crate::model::{LlmRequest, LlmResponse};

/// MIME types extracted as data files for the executor.
const DATA_FILE_MIME_TYPES: &[&str] = &["text/csv"];

/// Extracts inline data files from the request, registers them with the
/// executor context, and emits exploration code plus its output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeExecutionRequestProcessor;

#[async_trait]
impl LlmRequestProcessor for CodeExecutionRequestProcessor {
    async fn run(&self, ctx: &InvocationContext, request: &mut LlmRequest) -> Result<Vec<Event>> {
        let Some(executor) = ctx.agent.as_llm_agent().and_then(|llm| llm.code_executor.clone())
        else {
            return Ok(Vec::new());
        };
        if !executor.optimize_data_file() {
            return Ok(Vec::new());
        }

        let mut code_ctx = CodeExecutorContext::new(ctx.session.state_snapshot());
        let known = code_ctx.input_files().len();
        let mut new_files = Vec::new();
        for content in &mut request.contents {
            if content.role != Role::User {
                continue;
            }
            for part in &mut content.parts {
                let Part::InlineData(blob) = part else {
                    continue;
                };
                if !DATA_FILE_MIME_TYPES.contains(&blob.mime_type.as_str()) {
                    continue;
                }
                let name = format!("data_{}.csv", known + new_files.len() + 1);
                new_files.push(CodeExecutionFile {
                    name: name.clone(),
                    mime_type: blob.mime_type.clone(),
                    content: blob.data.clone(),
                });
                *part = Part::text(format!("\nAvailable file: `{name}`\n"));
            }
        }
        if new_files.is_empty() {
            return Ok(Vec::new());
        }
        code_ctx.add_input_files(new_files.clone())?;
        debug!(count = new_files.len(), "registered data files for code execution");

        let mut events = Vec::new();
        let delimiters = executor
            .code_block_delimiters()
            .into_iter()
            .next()
            .unwrap_or_else(|| ("```python\n".to_string(), "\n```".to_string()));
        for file in &new_files {
            let stem = file.name.trim_end_matches(".csv").replace('.', "_");
            let code = format!(
                "import pandas as pd\n{stem} = pd.read_csv('{name}')\nprint({stem}.head())",
                name = file.name
            );

            events.push(
                ctx.agent.new_event(ctx).with_content(Content::model(vec![Part::text(
                    format!("{}{}{}", delimiters.0, code, delimiters.1),
                )])),
            );

            let result = executor
                .execute_code(
                    ctx,
                    CodeExecutionInput {
                        code,
                        input_files: code_ctx.input_files(),
                        execution_id: Some(ctx.session.id.clone()),
                    },
                )
                .await?;
            let formatted =
                format_execution_result(&result, &executor.execution_result_delimiters());
            let actions = EventActions {
                state_delta: code_ctx.state_delta(),
                ..EventActions::default()
            };
            events.push(
                ctx.agent
                    .new_event(ctx)
                    .with_content(Content::user(vec![Part::text(formatted)]))
                    .with_actions(actions),
            );
        }
        Ok(events)
    }
}

/// Executes the first fenced code block of a non-partial response.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeExecutionResponseProcessor;

#[async_trait]
impl LlmResponseProcessor for CodeExecutionResponseProcessor {
    async fn run(&self, ctx: &InvocationContext, response: &mut LlmResponse) -> Result<Vec<Event>> {
        if response.partial {
            return Ok(Vec::new());
        }
        let Some(executor) = ctx.agent.as_llm_agent().and_then(|llm| llm.code_executor.clone())
        else {
            return Ok(Vec::new());
        };
        let Some(content) = &response.content else {
            return Ok(Vec::new());
        };

        let text = content.text();
        let Some(block) = extract_code_block(&text, &executor.code_block_delimiters()) else {
            return Ok(Vec::new());
        };

        let mut code_ctx = CodeExecutorContext::new(ctx.session.state_snapshot());
        if code_ctx.error_count(&ctx.invocation_id) >= executor.error_retry_attempts() {
            debug!(invocation = %ctx.invocation_id, "code execution retry budget exhausted");
            return Ok(Vec::new());
        }

        // The model event shows the content truncated at the code block;
        // the flow must not emit the response again.
        let code_event = ctx
            .agent
            .new_event(ctx)
            .with_content(Content::model(vec![Part::text(block.truncated())]));
        response.content = None;

        let result = executor
            .execute_code(
                ctx,
                CodeExecutionInput {
                    code: block.code,
                    input_files: code_ctx.input_files(),
                    execution_id: Some(ctx.session.id.clone()),
                },
            )
            .await?;

        if result.stderr.is_empty() {
            code_ctx.reset_error_count(&ctx.invocation_id);
        } else {
            code_ctx.increment_error_count(&ctx.invocation_id);
        }

        let mut actions = EventActions {
            state_delta: code_ctx.state_delta(),
            ..EventActions::default()
        };
        if let Some(artifacts) = &ctx.artifact_service {
            for file in &result.output_files {
                let version = artifacts
                    .save_artifact(
                        &ctx.session.app_name,
                        &ctx.session.user_id,
                        &ctx.session.id,
                        &file.name,
                        Blob::new(file.mime_type.clone(), file.content.clone()),
                    )
                    .await?;
                actions.artifact_delta.insert(file.name.clone(), version);
            }
        }

        let formatted = format_execution_result(&result, &executor.execution_result_delimiters());
        let result_event = ctx
            .agent
            .new_event(ctx)
            .with_content(Content::user(vec![Part::text(formatted)]))
            .with_actions(actions);

        Ok(vec![code_event, result_event])
    }
}

/// Test helper: an executor usable from unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::code_executor::{CodeExecutionResult, CodeExecutor};

    /// Echoes the code back as stdout; errors when the code contains
    /// `boom`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct EchoExecutor {
        /// Whether inline data files should be extracted.
        pub optimize: bool,
    }

    #[async_trait]
    impl CodeExecutor for EchoExecutor {
        fn optimize_data_file(&self) -> bool {
            self.optimize
        }

        async fn execute_code(
            &self,
            _ctx: &InvocationContext,
            input: CodeExecutionInput,
        ) -> Result<CodeExecutionResult> {
            if input.code.contains("boom") {
                return Ok(CodeExecutionResult {
                    stdout: String::new(),
                    stderr: "exploded".to_string(),
                    output_files: Vec::new(),
                });
            }
            Ok(CodeExecutionResult {
                stdout: format!("ran: {}", input.code),
                stderr: String::new(),
                output_files: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::EchoExecutor;
    use super::*;
    use crate::agent::LlmAgentBuilder;
    use crate::context::RunConfig;
    use crate::model::mock::MockLlm;
    use crate::session::{InMemorySessionService, Session};
    use std::sync::Arc;

    fn exec_ctx(optimize: bool) -> InvocationContext {
        let agent = LlmAgentBuilder::new("coder")
            .model(Arc::new(MockLlm::text("mock", "hi")))
            .code_executor(Arc::new(EchoExecutor { optimize }))
            .build()
            .expect("agent");
        let session = Arc::new(Session::new("s1", "app", "u", JsonMap::new()));
        InvocationContext::new(
            agent,
            session,
            Arc::new(InMemorySessionService::new()),
            RunConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_response_processor_executes_block_and_truncates() {
        let ctx = exec_ctx(false);
        let mut response = LlmResponse::new(Content::model(vec![Part::text(
            "Computing.\n```python\nprint(40 + 2)\n```\ntrailing prose",
        )]));

        let events = CodeExecutionResponseProcessor
            .run(&ctx, &mut response)
            .await
            .expect("run");

        assert_eq!(events.len(), 2);
        assert!(response.content.is_none());
        let code_text = events[0].content.as_ref().expect("content").text();
        assert!(code_text.ends_with("```"));
        assert!(!code_text.contains("trailing prose"));
        let result_text = events[1].content.as_ref().expect("content").text();
        assert!(result_text.contains("ran: print(40 + 2)"));
    }

    #[tokio::test]
    async fn test_response_without_code_is_untouched() {
        let ctx = exec_ctx(false);
        let mut response = LlmResponse::new(Content::model_text("no code here"));
        let events = CodeExecutionResponseProcessor
            .run(&ctx, &mut response)
            .await
            .expect("run");
        assert!(events.is_empty());
        assert!(response.content.is_some());
    }

    #[tokio::test]
    async fn test_request_processor_extracts_csv_files() {
        let ctx = exec_ctx(true);
        let mut request = LlmRequest::new();
        request.contents = vec![Content::user(vec![
            Part::text("analyze this"),
            Part::inline_data("text/csv", b"a,b\n1,2\n".to_vec()),
        ])];

        let events = CodeExecutionRequestProcessor
            .run(&ctx, &mut request)
            .await
            .expect("run");

        // One code event and one result event for the single file.
        assert_eq!(events.len(), 2);
        let placeholder = request.contents[0].text();
        assert!(placeholder.contains("Available file: `data_1.csv`"));
        assert!(
            events[1]
                .actions
                .state_delta
                .contains_key("_code_executor_input_files")
        );
    }
}
