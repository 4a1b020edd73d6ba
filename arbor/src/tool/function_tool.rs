//! Wrapping plain functions as tools.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::content::JsonMap;
use crate::error::Result;

use super::{FunctionDeclaration, Tool, ToolContext};

/// The execution seam of a [`FunctionTool`].
///
/// Implemented for free by any sync closure
/// `Fn(JsonMap, &ToolContext) -> Result<JsonMap>`; implement the trait
/// directly when the tool needs to await.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute with the given arguments.
    async fn handle(&self, args: JsonMap, ctx: &ToolContext) -> Result<JsonMap>;
}

#[async_trait]
impl<F> ToolHandler for F
where
    F: Fn(JsonMap, &ToolContext) -> Result<JsonMap> + Send + Sync,
{
    async fn handle(&self, args: JsonMap, ctx: &ToolContext) -> Result<JsonMap> {
        self(args, ctx)
    }
}

/// A tool backed by a function.
///
/// The argument schema defaults to an open object; supply one with
/// [`FunctionTool::with_parameters`] or derive it from a typed arguments
/// struct via [`parameters_schema`].
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    long_running: bool,
    handler: Arc<dyn ToolHandler>,
}

impl FunctionTool {
    /// Wrap a handler (a sync closure or a [`ToolHandler`] impl).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object"}),
            long_running: false,
            handler: Arc::new(handler),
        }
    }

    /// Set the argument schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Mark the tool long-running: its response may arrive in a later
    /// invocation, and an empty result suppresses the response event.
    #[must_use]
    pub const fn with_long_running(mut self, long_running: bool) -> Self {
        self.long_running = long_running;
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_long_running(&self) -> bool {
        self.long_running
    }

    fn declaration(&self) -> Option<FunctionDeclaration> {
        Some(FunctionDeclaration::new(
            self.name.clone(),
            self.description.clone(),
            self.parameters.clone(),
        ))
    }

    async fn run(&self, args: JsonMap, ctx: &ToolContext) -> Result<JsonMap> {
        self.handler.handle(args, ctx).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("long_running", &self.long_running)
            .finish_non_exhaustive()
    }
}

/// Derive a JSON argument schema from a typed arguments struct.
#[must_use]
pub fn parameters_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}
