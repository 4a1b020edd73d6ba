//! The LLM agent: drives a model through the flow pipeline.

use std::sync::{Arc, OnceLock};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt as _;
use serde_json::Value;
use tracing::warn;

use crate::code_executor::CodeExecutor;
use crate::context::{InvocationContext, ReadonlyContext};
use crate::error::{AgentError, Result};
use crate::event::{Event, EventStream};
use crate::flow::LlmFlow;
use crate::model::{GenerateContentConfig, Llm, registry::LlmRegistry};
use crate::planner::Planner;
use crate::tool::{Tool, Toolset};

use super::callbacks::{
    AfterModelCallback, AfterToolCallback, AgentCallback, BeforeModelCallback, BeforeToolCallback,
};
use super::{Agent, AgentBuilder, AgentKind};

/// Tool names users may not register: the framework synthesizes calls to
/// these itself. `stop_streaming` is exempt — its shipped instance is how
/// streaming cancellation gets advertised in live mode.
const RESERVED_TOOL_NAMES: &[&str] = &[
    crate::tool::TRANSFER_TO_AGENT_TOOL_NAME,
    crate::tool::TASK_COMPLETED_TOOL_NAME,
    crate::auth::REQUEST_CREDENTIAL_TOOL_NAME,
];

/// Which model an LLM agent talks to. When absent, the nearest LLM
/// ancestor's model is used.
#[derive(Clone)]
pub enum ModelRef {
    /// Resolve by name through the global registry.
    Named(String),
    /// Use this instance directly.
    Instance(Arc<dyn Llm>),
}

impl std::fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Instance(llm) => f.debug_tuple("Instance").field(&llm.model_name()).finish(),
        }
    }
}

/// Produces an instruction string from the read-only context.
#[async_trait]
pub trait InstructionProvider: Send + Sync {
    /// Produce the instruction.
    async fn call(&self, ctx: &ReadonlyContext) -> Result<String>;
}

#[async_trait]
impl<F> InstructionProvider for F
where
    F: Fn(&ReadonlyContext) -> Result<String> + Send + Sync,
{
    async fn call(&self, ctx: &ReadonlyContext) -> Result<String> {
        self(ctx)
    }
}

/// An instruction: absent, a template string, or a provider callback.
///
/// Template strings undergo session-state substitution; provider output
/// is used verbatim.
#[derive(Clone, Default)]
pub enum Instruction {
    /// No instruction.
    #[default]
    None,
    /// A template string.
    Text(String),
    /// A provider callback.
    Provider(Arc<dyn InstructionProvider>),
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Whether session history is included in model requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeContents {
    /// Branch-filtered session history is included.
    #[default]
    Default,
    /// Only the current invocation's input is included.
    None,
}

/// Configuration of one LLM agent.
#[derive(Clone)]
pub struct LlmAgent {
    pub(crate) model: Option<ModelRef>,
    pub(crate) instruction: Instruction,
    pub(crate) global_instruction: Instruction,
    pub(crate) tools: Vec<Arc<dyn Tool>>,
    pub(crate) toolsets: Vec<Arc<dyn Toolset>>,
    pub(crate) generate_content_config: Option<GenerateContentConfig>,
    pub(crate) disallow_transfer_to_parent: bool,
    pub(crate) disallow_transfer_to_peers: bool,
    pub(crate) include_contents: IncludeContents,
    pub(crate) input_schema: Option<Value>,
    pub(crate) output_schema: Option<Value>,
    pub(crate) output_key: Option<String>,
    pub(crate) planner: Option<Arc<dyn Planner>>,
    pub(crate) code_executor: Option<Arc<dyn CodeExecutor>>,
    pub(crate) before_model_callbacks: Vec<Arc<dyn BeforeModelCallback>>,
    pub(crate) after_model_callbacks: Vec<Arc<dyn AfterModelCallback>>,
    pub(crate) before_tool_callbacks: Vec<Arc<dyn BeforeToolCallback>>,
    pub(crate) after_tool_callbacks: Vec<Arc<dyn AfterToolCallback>>,
    pub(crate) instruction_prefixes: Vec<String>,
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("model", &self.model)
            .field("tools", &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .field("output_key", &self.output_key)
            .finish_non_exhaustive()
    }
}

impl LlmAgent {
    /// The generation config, if set.
    #[must_use]
    pub const fn generate_content_config(&self) -> Option<&GenerateContentConfig> {
        self.generate_content_config.as_ref()
    }

    /// The output schema, if set.
    #[must_use]
    pub const fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref()
    }

    /// Number of directly configured tools.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Resolve the model: an explicit instance, a registered name, or the
    /// nearest LLM ancestor's model.
    pub fn canonical_model(&self, node: &Arc<Agent>) -> Result<Arc<dyn Llm>> {
        match &self.model {
            Some(ModelRef::Instance(llm)) => Ok(Arc::clone(llm)),
            Some(ModelRef::Named(name)) => LlmRegistry::global().resolve(name),
            None => {
                let mut current = node.parent();
                while let Some(ancestor) = current {
                    if let Some(llm) = ancestor.as_llm_agent()
                        && llm.model.is_some()
                    {
                        return llm.canonical_model(&ancestor);
                    }
                    current = ancestor.parent();
                }
                Err(AgentError::configuration(format!(
                    "no model configured for agent '{}' or any of its ancestors",
                    node.name()
                )))
            }
        }
    }

    /// Resolve the agent instruction. The boolean is true when the result
    /// must bypass template substitution (provider output is verbatim).
    pub async fn canonical_instruction(&self, ctx: &ReadonlyContext) -> Result<(String, bool)> {
        let (mut text, bypass) = match &self.instruction {
            Instruction::None => (String::new(), false),
            Instruction::Text(text) => (text.clone(), false),
            Instruction::Provider(provider) => (provider.call(ctx).await?, true),
        };
        if !self.instruction_prefixes.is_empty() {
            let mut combined = self.instruction_prefixes.join("\n\n");
            if !text.is_empty() {
                combined.push_str("\n\n");
                combined.push_str(&text);
            }
            text = combined;
        }
        Ok((text, bypass))
    }

    /// Resolve the global instruction (consulted on the root agent only).
    pub async fn canonical_global_instruction(
        &self,
        ctx: &ReadonlyContext,
    ) -> Result<(String, bool)> {
        match &self.global_instruction {
            Instruction::None => Ok((String::new(), false)),
            Instruction::Text(text) => Ok((text.clone(), false)),
            Instruction::Provider(provider) => Ok((provider.call(ctx).await?, true)),
        }
    }

    /// Resolve the full tool list, expanding toolsets lazily.
    pub async fn canonical_tools(&self, ctx: &ReadonlyContext) -> Result<Vec<Arc<dyn Tool>>> {
        let mut tools = self.tools.clone();
        for toolset in &self.toolsets {
            tools.extend(toolset.get_tools(ctx).await?);
        }
        Ok(tools)
    }

    /// Whether this agent needs the auto flow (transfer advertisement).
    #[must_use]
    pub fn uses_auto_flow(&self, node: &Agent) -> bool {
        !(self.disallow_transfer_to_parent
            && self.disallow_transfer_to_peers
            && node.sub_agents().is_empty())
    }

    /// A copy with one tool appended.
    #[must_use]
    pub fn copy_with_extra_tool(&self, tool: Arc<dyn Tool>) -> Self {
        let mut copy = self.clone();
        copy.tools.push(tool);
        copy
    }

    /// A copy with an instruction paragraph prepended.
    #[must_use]
    pub fn with_instruction_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.instruction_prefixes.push(prefix.into());
        self
    }

    /// Fold a final text response into `state_delta[output_key]`.
    fn save_output_to_state(&self, agent_name: &str, event: &mut Event) -> Result<()> {
        let Some(output_key) = &self.output_key else {
            return Ok(());
        };
        if event.author != agent_name || !event.is_final_response() {
            return Ok(());
        }
        let Some(content) = &event.content else {
            return Ok(());
        };
        let text = content.text();
        if text.is_empty() {
            return Ok(());
        }
        let value = if self.output_schema.is_some() {
            serde_json::from_str::<Value>(&text)?
        } else {
            Value::String(text)
        };
        event.actions.state_delta.insert(output_key.clone(), value);
        Ok(())
    }
}

/// Run the selected flow and post-process events for the output key.
pub(super) fn execute(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    let flow = flow_for(&agent);
    Box::pin(stream! {
        let agent_name = agent.name().to_string();
        let llm = match agent.as_llm_agent() {
            Some(llm) => llm.clone(),
            None => {
                yield Err(AgentError::internal("llm execute on non-llm agent"));
                return;
            }
        };
        let mut events = flow.run(ctx);
        while let Some(item) = events.next().await {
            match item {
                Ok(mut event) => {
                    if let Err(e) = llm.save_output_to_state(&agent_name, &mut event) {
                        warn!(agent = %agent_name, error = %e, "output capture failed");
                        yield Err(e);
                        return;
                    }
                    yield Ok(event);
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

/// Live-mode execution through the flow's live loop.
pub(super) fn execute_live(agent: Arc<Agent>, ctx: InvocationContext) -> EventStream {
    let flow = flow_for(&agent);
    flow.run_live(ctx)
}

fn flow_for(agent: &Arc<Agent>) -> Arc<LlmFlow> {
    let auto = agent
        .as_llm_agent()
        .is_some_and(|llm| llm.uses_auto_flow(agent));
    if auto { LlmFlow::auto() } else { LlmFlow::single() }
}

/// Build a detached copy of an LLM agent node carrying a replacement
/// config. The copy points at the original's parent so tree navigation
/// keeps working, but the original tree never observes the copy.
pub(super) fn detached_copy(original: &Arc<Agent>, llm: LlmAgent) -> Arc<Agent> {
    let copy = Arc::new(Agent {
        name: original.name.clone(),
        description: original.description.clone(),
        kind: AgentKind::Llm(llm),
        sub_agents: original.sub_agents.clone(),
        parent: OnceLock::new(),
        before_agent_callbacks: original.before_agent_callbacks.clone(),
        after_agent_callbacks: original.after_agent_callbacks.clone(),
    });
    if let Some(parent_weak) = original.parent.get() {
        let _ = copy.parent.set(parent_weak.clone());
    }
    copy
}

/// Builder for LLM agents.
pub struct LlmAgentBuilder {
    base: AgentBuilder,
    llm: LlmAgent,
}

impl std::fmt::Debug for LlmAgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgentBuilder")
            .field("base", &self.base)
            .field("llm", &self.llm)
            .finish()
    }
}

impl LlmAgentBuilder {
    /// Start building an LLM agent with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: AgentBuilder::new(name),
            llm: LlmAgent {
                model: None,
                instruction: Instruction::None,
                global_instruction: Instruction::None,
                tools: Vec::new(),
                toolsets: Vec::new(),
                generate_content_config: None,
                disallow_transfer_to_parent: false,
                disallow_transfer_to_peers: false,
                include_contents: IncludeContents::Default,
                input_schema: None,
                output_schema: None,
                output_key: None,
                planner: None,
                code_executor: None,
                before_model_callbacks: Vec::new(),
                after_model_callbacks: Vec::new(),
                before_tool_callbacks: Vec::new(),
                after_tool_callbacks: Vec::new(),
                instruction_prefixes: Vec::new(),
            },
        }
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.base = self.base.description(description);
        self
    }

    /// Route to a registered model by name.
    #[must_use]
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.llm.model = Some(ModelRef::Named(name.into()));
        self
    }

    /// Use a model instance directly.
    #[must_use]
    pub fn model(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm.model = Some(ModelRef::Instance(llm));
        self
    }

    /// Set the instruction template.
    #[must_use]
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.llm.instruction = Instruction::Text(instruction.into());
        self
    }

    /// Set an instruction provider (bypasses template substitution).
    #[must_use]
    pub fn instruction_provider(mut self, provider: impl InstructionProvider + 'static) -> Self {
        self.llm.instruction = Instruction::Provider(Arc::new(provider));
        self
    }

    /// Set the global instruction template (root agent only).
    #[must_use]
    pub fn global_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.llm.global_instruction = Instruction::Text(instruction.into());
        self
    }

    /// Set a global instruction provider (bypasses template substitution).
    #[must_use]
    pub fn global_instruction_provider(
        mut self,
        provider: impl InstructionProvider + 'static,
    ) -> Self {
        self.llm.global_instruction = Instruction::Provider(Arc::new(provider));
        self
    }

    /// Append a tool.
    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.llm.tools.push(tool);
        self
    }

    /// Append tools.
    #[must_use]
    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.llm.tools.extend(tools);
        self
    }

    /// Append a toolset, resolved lazily at request time.
    #[must_use]
    pub fn toolset(mut self, toolset: Arc<dyn Toolset>) -> Self {
        self.llm.toolsets.push(toolset);
        self
    }

    /// Set the advisory generation config.
    #[must_use]
    pub fn generate_content_config(mut self, config: GenerateContentConfig) -> Self {
        self.llm.generate_content_config = Some(config);
        self
    }

    /// Forbid transfers to the parent agent.
    #[must_use]
    pub const fn disallow_transfer_to_parent(mut self, disallow: bool) -> Self {
        self.llm.disallow_transfer_to_parent = disallow;
        self
    }

    /// Forbid transfers to peer agents.
    #[must_use]
    pub const fn disallow_transfer_to_peers(mut self, disallow: bool) -> Self {
        self.llm.disallow_transfer_to_peers = disallow;
        self
    }

    /// Control how much history reaches the model.
    #[must_use]
    pub const fn include_contents(mut self, include: IncludeContents) -> Self {
        self.llm.include_contents = include;
        self
    }

    /// Document the expected input shape.
    #[must_use]
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.llm.input_schema = Some(schema);
        self
    }

    /// Constrain the final response to a JSON schema. Forces transfer
    /// restrictions and forbids tools and sub-agents.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.llm.output_schema = Some(schema);
        self
    }

    /// Store the final response text under this session-state key.
    #[must_use]
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.llm.output_key = Some(key.into());
        self
    }

    /// Set the planner.
    #[must_use]
    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.llm.planner = Some(planner);
        self
    }

    /// Set the code executor.
    #[must_use]
    pub fn code_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.llm.code_executor = Some(executor);
        self
    }

    /// Append a before-model callback.
    #[must_use]
    pub fn before_model(mut self, callback: impl BeforeModelCallback + 'static) -> Self {
        self.llm.before_model_callbacks.push(Arc::new(callback));
        self
    }

    /// Append an after-model callback.
    #[must_use]
    pub fn after_model(mut self, callback: impl AfterModelCallback + 'static) -> Self {
        self.llm.after_model_callbacks.push(Arc::new(callback));
        self
    }

    /// Append a before-tool callback.
    #[must_use]
    pub fn before_tool(mut self, callback: impl BeforeToolCallback + 'static) -> Self {
        self.llm.before_tool_callbacks.push(Arc::new(callback));
        self
    }

    /// Append an after-tool callback.
    #[must_use]
    pub fn after_tool(mut self, callback: impl AfterToolCallback + 'static) -> Self {
        self.llm.after_tool_callbacks.push(Arc::new(callback));
        self
    }

    /// Append a before-agent callback.
    #[must_use]
    pub fn before_agent(mut self, callback: impl AgentCallback + 'static) -> Self {
        self.base = self.base.before_agent(callback);
        self
    }

    /// Append an after-agent callback.
    #[must_use]
    pub fn after_agent(mut self, callback: impl AgentCallback + 'static) -> Self {
        self.base = self.base.after_agent(callback);
        self
    }

    /// Append a sub-agent.
    #[must_use]
    pub fn sub_agent(mut self, agent: Arc<Agent>) -> Self {
        self.base = self.base.sub_agent(agent);
        self
    }

    /// Append sub-agents.
    #[must_use]
    pub fn sub_agents(mut self, agents: Vec<Arc<Agent>>) -> Self {
        self.base = self.base.sub_agents(agents);
        self
    }

    /// Validate and build the agent node.
    pub fn build(mut self) -> Result<Arc<Agent>> {
        for tool in &self.llm.tools {
            if RESERVED_TOOL_NAMES.contains(&tool.name()) {
                return Err(AgentError::configuration(format!(
                    "tool name '{}' is reserved for the framework",
                    tool.name()
                )));
            }
        }
        if self.llm.output_schema.is_some() {
            self.llm.disallow_transfer_to_parent = true;
            self.llm.disallow_transfer_to_peers = true;
            if !self.llm.tools.is_empty() || !self.llm.toolsets.is_empty() {
                return Err(AgentError::configuration(
                    "an agent with an output schema cannot use tools",
                ));
            }
            if !self.base.sub_agents.is_empty() {
                return Err(AgentError::configuration(
                    "an agent with an output schema cannot have sub-agents",
                ));
            }
        }
        self.base.build_kind(AgentKind::Llm(self.llm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockLlm;
    use serde_json::json;

    #[test]
    fn test_output_schema_forces_transfer_restrictions() {
        let agent = LlmAgentBuilder::new("typed")
            .model(Arc::new(MockLlm::text("mock", "{}")))
            .output_schema(json!({"type": "object"}))
            .build()
            .expect("build");
        let llm = agent.as_llm_agent().expect("llm");
        assert!(llm.disallow_transfer_to_parent);
        assert!(llm.disallow_transfer_to_peers);
        assert!(!llm.uses_auto_flow(&agent));
    }

    #[test]
    fn test_output_schema_rejects_tools_and_sub_agents() {
        let with_tool = LlmAgentBuilder::new("bad")
            .output_schema(json!({"type": "object"}))
            .tool(crate::tool::exit_loop_tool())
            .build();
        assert!(with_tool.is_err());

        let child = Agent::sequential("child", Vec::new()).expect("child");
        let with_child = LlmAgentBuilder::new("bad2")
            .output_schema(json!({"type": "object"}))
            .sub_agent(child)
            .build();
        assert!(with_child.is_err());
    }

    #[test]
    fn test_reserved_tool_names_rejected() {
        let impostor = crate::tool::FunctionTool::new(
            "transfer_to_agent",
            "Not the real one.",
            |_: crate::content::JsonMap, _: &crate::tool::ToolContext| {
                Ok(crate::content::JsonMap::new())
            },
        );
        let result = LlmAgentBuilder::new("bad")
            .model(Arc::new(MockLlm::text("mock", "hi")))
            .tool(Arc::new(impostor))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_flow_selection() {
        let single = LlmAgentBuilder::new("lone")
            .model(Arc::new(MockLlm::text("mock", "hi")))
            .disallow_transfer_to_parent(true)
            .disallow_transfer_to_peers(true)
            .build()
            .expect("build");
        assert!(!single.as_llm_agent().expect("llm").uses_auto_flow(&single));

        let auto = LlmAgentBuilder::new("social")
            .model(Arc::new(MockLlm::text("mock", "hi")))
            .build()
            .expect("build");
        assert!(auto.as_llm_agent().expect("llm").uses_auto_flow(&auto));
    }

    #[test]
    fn test_model_falls_back_to_ancestor() {
        let child = LlmAgentBuilder::new("child").build().expect("child");
        let parent = LlmAgentBuilder::new("parent")
            .model(Arc::new(MockLlm::text("ancestor-model", "hi")))
            .sub_agent(Arc::clone(&child))
            .build()
            .expect("parent");
        let _ = &parent;

        let resolved = child
            .as_llm_agent()
            .expect("llm")
            .canonical_model(&child)
            .expect("resolve");
        assert_eq!(resolved.model_name(), "ancestor-model");
    }
}
