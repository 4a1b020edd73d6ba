//! The model-provider contract: request/response types, the [`Llm`] trait
//! and its live-connection counterpart.
//!
//! The core never talks to a transport directly; providers implement
//! [`Llm`] and are resolved by name through the [`registry::LlmRegistry`].

pub mod mock;
pub mod registry;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{Blob, Content, JsonMap};
use crate::error::{AgentError, Result};
use crate::tool::{FunctionDeclaration, Tool};

/// Stream of model responses (streaming generation or live receive).
pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmResponse>> + Send>>;

/// Generation parameters handed to the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateContentConfig {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Top-p sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Stop sequences to end generation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Schema the response must conform to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    /// MIME type of the response payload (set with the schema).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

/// Parameters for a live (bidirectional) connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveConnectConfig {
    /// Modalities the model should respond with (e.g. `TEXT`, `AUDIO`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
}

/// A model request, built up by request processors in pipeline order.
#[derive(Clone, Default)]
pub struct LlmRequest {
    /// Model name to route to.
    pub model: Option<String>,
    /// Ordered conversation contents.
    pub contents: Vec<Content>,
    /// Generation parameters.
    pub config: GenerateContentConfig,
    /// System instruction paragraphs, joined on send.
    pub system_instructions: Vec<String>,
    /// Declarations advertised to the model.
    pub function_declarations: Vec<FunctionDeclaration>,
    /// Tools by name, for dispatching the model's function calls.
    pub tools: HashMap<String, Arc<dyn Tool>>,
    /// Live-connection parameters.
    pub live_connect_config: LiveConnectConfig,
}

impl LlmRequest {
    /// Create an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append system instruction paragraphs.
    pub fn append_instructions<I, S>(&mut self, instructions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_instructions
            .extend(instructions.into_iter().map(Into::into).filter(|s: &String| !s.is_empty()));
    }

    /// The full system instruction buffer.
    #[must_use]
    pub fn system_instruction(&self) -> String {
        self.system_instructions.join("\n\n")
    }

    /// Register a tool: advertises its declaration and adds it to the
    /// dispatch map.
    pub fn append_tool(&mut self, tool: Arc<dyn Tool>) {
        if let Some(declaration) = tool.declaration() {
            self.function_declarations.push(declaration);
        }
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Constrain the response to a JSON schema.
    pub fn set_output_schema(&mut self, schema: Value) {
        self.config.response_schema = Some(schema);
        self.config.response_mime_type = Some("application/json".to_string());
    }
}

impl std::fmt::Debug for LlmRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tool_names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        tool_names.sort_unstable();
        f.debug_struct("LlmRequest")
            .field("model", &self.model)
            .field("contents", &self.contents.len())
            .field("config", &self.config)
            .field("system_instructions", &self.system_instructions.len())
            .field("tools", &tool_names)
            .finish_non_exhaustive()
    }
}

/// A model response as delivered by the transport adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The generated content, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Grounding metadata passed through opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding_metadata: Option<Value>,
    /// Whether this is an incremental chunk.
    #[serde(default)]
    pub partial: bool,
    /// Whether the model signalled end of turn (live mode).
    #[serde(default)]
    pub turn_complete: bool,
    /// Whether generation was interrupted (live mode).
    #[serde(default)]
    pub interrupted: bool,
    /// Transport error code, if the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Transport error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Provider-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_metadata: Option<JsonMap>,
}

impl LlmResponse {
    /// Create a response carrying content.
    #[must_use]
    pub fn new(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Mark as a partial chunk.
    #[must_use]
    pub const fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }
}

/// The core trait for model providers.
#[async_trait]
pub trait Llm: Send + Sync {
    /// The model identifier this instance serves.
    fn model_name(&self) -> &str;

    /// Generate a single response.
    async fn generate_content(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Generate a streamed response.
    ///
    /// The default falls back to one unary call yielded as a single item.
    async fn generate_content_stream(&self, request: &LlmRequest) -> Result<LlmResponseStream> {
        let response = self.generate_content(request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(response) })))
    }

    /// Open a live bidirectional connection.
    async fn connect(&self, _request: &LlmRequest) -> Result<Arc<dyn LlmConnection>> {
        Err(AgentError::not_implemented(format!(
            "live connections for model '{}'",
            self.model_name()
        )))
    }
}

/// A live bidirectional connection to a model.
///
/// Methods take `&self` so one task can send while another receives.
#[async_trait]
pub trait LlmConnection: Send + Sync {
    /// Seed the connection with prior conversation history.
    async fn send_history(&self, contents: Vec<Content>) -> Result<()>;

    /// Send one content turn.
    async fn send_content(&self, content: Content) -> Result<()>;

    /// Send raw realtime bytes (e.g. audio frames).
    async fn send_realtime(&self, blob: Blob) -> Result<()>;

    /// The server-to-client response stream. Callable once.
    async fn receive(&self) -> Result<LlmResponseStream>;

    /// Close the connection.
    async fn close(&self) -> Result<()>;
}
