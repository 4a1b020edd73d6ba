//! Convenience re-exports of the commonly used surface.

pub use crate::agent::{
    Agent, AgentBuilder, AgentKind, IncludeContents, Instruction, InstructionProvider, LlmAgent,
    LlmAgentBuilder, ModelRef, validate_tree,
};
pub use crate::agent::callbacks::{
    AfterModelCallback, AfterToolCallback, AgentCallback, BeforeModelCallback, BeforeToolCallback,
};
pub use crate::artifact::{ArtifactService, InMemoryArtifactService};
pub use crate::auth::{AuthConfig, AuthHandler, AuthToolArguments, REQUEST_CREDENTIAL_TOOL_NAME};
pub use crate::code_executor::{
    CodeExecutionFile, CodeExecutionInput, CodeExecutionResult, CodeExecutor, CodeExecutorContext,
};
pub use crate::content::{Blob, Content, FunctionCall, FunctionResponse, JsonMap, Part, Role};
pub use crate::context::{
    CallbackContext, InvocationContext, ReadonlyContext, RunConfig, StreamingMode,
};
pub use crate::error::{AgentError, Result};
pub use crate::event::{Event, EventActions, EventItem, EventStream, USER_AUTHOR};
pub use crate::flow::{LlmFlow, LlmRequestProcessor, LlmResponseProcessor};
pub use crate::live::{LiveRequest, LiveRequestQueue};
pub use crate::memory::{InMemoryMemoryService, MemoryEntry, MemoryService};
pub use crate::model::{
    GenerateContentConfig, Llm, LlmConnection, LlmRequest, LlmResponse, LlmResponseStream,
    registry::LlmRegistry,
};
pub use crate::planner::{PlanReActPlanner, Planner};
pub use crate::runner::Runner;
pub use crate::session::{InMemorySessionService, Session, SessionService};
pub use crate::tool::{
    FunctionDeclaration, FunctionTool, StreamingFunctionTool, Tool, ToolContext, ToolHandler,
    Toolset, exit_loop_tool, transfer_to_agent_tool,
};
