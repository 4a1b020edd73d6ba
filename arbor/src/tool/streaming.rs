//! Streaming tools for live mode.
//!
//! A streaming tool does not return a single response; it produces a
//! stream of result maps that a background task pipes into the live
//! request queue as user turns. The distinguished `stop_streaming` tool
//! cancels such a task by tool name.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::json;

use crate::content::JsonMap;
use crate::error::{AgentError, Result};

use super::{FunctionDeclaration, FunctionTool, Tool, ToolContext};

/// Reserved name of the streaming-cancellation tool.
pub const STOP_STREAMING_TOOL_NAME: &str = "stop_streaming";

type StreamHandler =
    dyn Fn(JsonMap) -> BoxStream<'static, Result<JsonMap>> + Send + Sync;

/// A tool whose value is a stream of result maps, usable only in live
/// mode.
pub struct StreamingFunctionTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    handler: Arc<StreamHandler>,
}

impl StreamingFunctionTool {
    /// Wrap a function returning a result stream.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(JsonMap) -> BoxStream<'static, Result<JsonMap>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object"}),
            handler: Arc::new(handler),
        }
    }

    /// Set the argument schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Start the result stream.
    #[must_use]
    pub fn stream(&self, args: JsonMap) -> BoxStream<'static, Result<JsonMap>> {
        (self.handler)(args)
    }
}

#[async_trait]
impl Tool for StreamingFunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn declaration(&self) -> Option<FunctionDeclaration> {
        Some(FunctionDeclaration::new(
            self.name.clone(),
            self.description.clone(),
            self.parameters.clone(),
        ))
    }

    async fn run(&self, _args: JsonMap, _ctx: &ToolContext) -> Result<JsonMap> {
        Err(AgentError::not_implemented(format!(
            "streaming tool '{}' outside live mode",
            self.name
        )))
    }

    fn as_streaming(&self) -> Option<&StreamingFunctionTool> {
        Some(self)
    }
}

impl std::fmt::Debug for StreamingFunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingFunctionTool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The tool a model calls to cancel a running streaming tool. The live
/// flow intercepts its invocation; `run` never executes there.
#[must_use]
pub fn stop_streaming_tool() -> Arc<dyn Tool> {
    Arc::new(
        FunctionTool::new(
            STOP_STREAMING_TOOL_NAME,
            "Stop a running streaming tool by its function name.",
            |_args: JsonMap, _ctx: &ToolContext| Ok(JsonMap::new()),
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "function_name": {
                    "type": "string",
                    "description": "Name of the streaming function to stop."
                }
            },
            "required": ["function_name"]
        })),
    )
}
