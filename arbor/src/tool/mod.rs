//! The tool contract.
//!
//! Tools are opaque units invoked by name with a map of arguments. A tool
//! advertises itself to the model through [`Tool::process_llm_request`]
//! (by default, pushing its [`FunctionDeclaration`]) and executes through
//! [`Tool::run`] with a [`ToolContext`] carrying the function-call id and
//! the action bundle it may populate.

mod builtin;
mod context;
mod function_tool;
mod streaming;

pub use builtin::{
    EXIT_LOOP_TOOL_NAME, TASK_COMPLETED_TOOL_NAME, TRANSFER_TO_AGENT_TOOL_NAME,
    exit_loop_tool, task_completed_tool, transfer_to_agent_tool,
};
pub use context::ToolContext;
pub use function_tool::{FunctionTool, ToolHandler, parameters_schema};
pub use streaming::{STOP_STREAMING_TOOL_NAME, StreamingFunctionTool, stop_streaming_tool};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::JsonMap;
use crate::context::ReadonlyContext;
use crate::error::Result;
use crate::model::LlmRequest;

/// A function declaration advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Tool name, snake_case.
    pub name: String,
    /// What the tool does; helps the model decide when to call it.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl FunctionDeclaration {
    /// Create a declaration.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// The core trait for all tools agents can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's name, unique within one agent's tool map.
    fn name(&self) -> &str;

    /// What the tool does.
    fn description(&self) -> &str {
        ""
    }

    /// Whether the tool's response may arrive in a later invocation.
    fn is_long_running(&self) -> bool {
        false
    }

    /// The declaration to advertise, if any.
    fn declaration(&self) -> Option<FunctionDeclaration> {
        None
    }

    /// Contribute to the outgoing model request. The default advertises
    /// the tool's declaration; override to adjust tool config.
    async fn process_llm_request(
        &self,
        _tool_ctx: &ToolContext,
        request: &mut LlmRequest,
    ) -> Result<()> {
        if let Some(declaration) = self.declaration() {
            request.function_declarations.push(declaration);
        }
        Ok(())
    }

    /// Execute the tool.
    async fn run(&self, args: JsonMap, ctx: &ToolContext) -> Result<JsonMap>;

    /// Downcast to the streaming variant, when this tool is one.
    fn as_streaming(&self) -> Option<&StreamingFunctionTool> {
        None
    }
}

/// A lazily-resolved collection of tools.
#[async_trait]
pub trait Toolset: Send + Sync {
    /// The tools this set contributes for the given context.
    async fn get_tools(&self, ctx: &ReadonlyContext) -> Result<Vec<Arc<dyn Tool>>>;
}
