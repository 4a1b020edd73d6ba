//! Error types for the arbor framework.
//!
//! One enum covers the whole error taxonomy: configuration mistakes are
//! fatal at the point of discovery, transport failures terminate the
//! current flow step, and cancellation is distinguished from a clean
//! cooperative stop (which is not an error at all).

use thiserror::Error;

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// The main error type for agent operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// Invalid agent, flow, or tool configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// No model instance or factory is known under the given name.
    #[error("Model not found: '{model}'")]
    ModelNotFound {
        /// The requested model name.
        model: String,
    },

    /// A function call named a tool that is not in the tool map.
    #[error("Tool not found: '{name}'")]
    ToolNotFound {
        /// The requested tool name.
        name: String,
    },

    /// Error during tool execution.
    #[error("Tool execution error in '{tool_name}': {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// Error from the model transport.
    #[error("Model error: {message}")]
    Model {
        /// The underlying error message.
        message: String,
    },

    /// No agent with the given name exists in the tree.
    #[error("Agent not found: '{name}'")]
    AgentNotFound {
        /// The requested agent name.
        name: String,
    },

    /// The per-invocation model call ceiling was crossed.
    #[error("LLM call limit of {limit} exceeded for this invocation")]
    LlmCallsLimitExceeded {
        /// The configured ceiling.
        limit: usize,
    },

    /// The run was cancelled.
    #[error("Run was cancelled")]
    Cancelled,

    /// The operation is not supported by this agent kind or model.
    #[error("Not implemented: {what}")]
    NotImplemented {
        /// What was attempted.
        what: String,
    },

    /// Invalid state key or missing template binding.
    #[error("State error: {message}")]
    State {
        /// Description of the state issue.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal invariant was violated.
    #[error("Internal error: {message}")]
    Internal {
        /// The underlying error message.
        message: String,
    },
}

impl AgentError {
    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new model transport error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create a new not-implemented error.
    #[must_use]
    pub fn not_implemented(what: impl Into<String>) -> Self {
        Self::NotImplemented { what: what.into() }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
