//! Agents — nodes in a composition tree that emit event streams.
//!
//! An agent is one struct with a kind sum: `sequential`, `parallel`,
//! `loop`, or `llm`. Trees are built leaves-first; attaching a child that
//! already has a parent is a configuration error, which (together with
//! set-once weak parent pointers) makes cycles unrepresentable.

pub mod callbacks;
mod llm_agent;
mod loop_agent;
mod parallel;
mod sequential;

pub use llm_agent::{
    IncludeContents, Instruction, InstructionProvider, LlmAgent, LlmAgentBuilder, ModelRef,
};

use std::sync::{Arc, OnceLock, Weak};

use async_stream::stream;
use futures::StreamExt as _;
use tracing::debug;

use crate::context::{CallbackContext, InvocationContext};
use crate::error::{AgentError, Result};
use crate::event::{Event, EventStream, USER_AUTHOR};
use crate::session::state;

use callbacks::{AgentCallback, run_agent_callbacks};

/// The four agent kinds.
#[non_exhaustive]
pub enum AgentKind {
    /// Runs sub-agents in declaration order.
    Sequential,
    /// Runs sub-agents concurrently, merging their streams.
    Parallel,
    /// Repeats its sub-agents until escalation or an iteration cap.
    Loop {
        /// Maximum full passes over the children; 0 means unbounded.
        max_iterations: usize,
    },
    /// Drives a model through the flow pipeline.
    Llm(LlmAgent),
}

impl std::fmt::Debug for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => f.write_str("Sequential"),
            Self::Parallel => f.write_str("Parallel"),
            Self::Loop { max_iterations } => {
                f.debug_struct("Loop").field("max_iterations", max_iterations).finish()
            }
            Self::Llm(_) => f.write_str("Llm"),
        }
    }
}

/// A node in the composition tree.
pub struct Agent {
    name: String,
    description: String,
    kind: AgentKind,
    sub_agents: Vec<Arc<Agent>>,
    parent: OnceLock<Weak<Agent>>,
    before_agent_callbacks: Vec<Arc<dyn AgentCallback>>,
    after_agent_callbacks: Vec<Arc<dyn AgentCallback>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("sub_agents", &self.sub_agents.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    /// Create a sequential agent over the given children.
    pub fn sequential(name: impl Into<String>, sub_agents: Vec<Arc<Self>>) -> Result<Arc<Self>> {
        Self::builder(name).sub_agents(sub_agents).sequential()
    }

    /// Create a parallel agent over the given children.
    pub fn parallel(name: impl Into<String>, sub_agents: Vec<Arc<Self>>) -> Result<Arc<Self>> {
        Self::builder(name).sub_agents(sub_agents).parallel()
    }

    /// Create a loop agent over the given children. `max_iterations`
    /// counts full passes over the children; 0 means unbounded.
    pub fn looping(
        name: impl Into<String>,
        sub_agents: Vec<Arc<Self>>,
        max_iterations: usize,
    ) -> Result<Arc<Self>> {
        Self::builder(name).sub_agents(sub_agents).looping(max_iterations)
    }

    /// The agent's name, unique within its tree.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The agent's description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The agent's kind.
    #[must_use]
    pub const fn kind(&self) -> &AgentKind {
        &self.kind
    }

    /// The agent's children, in declaration order.
    #[must_use]
    pub fn sub_agents(&self) -> &[Arc<Self>] {
        &self.sub_agents
    }

    /// The agent's parent, if attached.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.get().and_then(Weak::upgrade)
    }

    /// The LLM configuration, when this is an LLM agent.
    #[must_use]
    pub const fn as_llm_agent(&self) -> Option<&LlmAgent> {
        match &self.kind {
            AgentKind::Llm(llm) => Some(llm),
            _ => None,
        }
    }

    /// The root of the tree this agent belongs to.
    #[must_use]
    pub fn root_agent(self: &Arc<Self>) -> Arc<Self> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Depth-first search by name, starting at this node.
    #[must_use]
    pub fn find_agent(self: &Arc<Self>, name: &str) -> Option<Arc<Self>> {
        if self.name == name {
            return Some(Arc::clone(self));
        }
        self.find_sub_agent(name)
    }

    /// Depth-first search by name within this node's descendants.
    #[must_use]
    pub fn find_sub_agent(self: &Arc<Self>, name: &str) -> Option<Arc<Self>> {
        for child in &self.sub_agents {
            if let Some(found) = child.find_agent(name) {
                return Some(found);
            }
        }
        None
    }

    /// Produce the agent's event stream in non-live mode.
    ///
    /// Applies before-agent callbacks, dispatches on the kind, applies
    /// after-agent callbacks. On an error item the stream yields it and
    /// ends.
    pub fn run(self: &Arc<Self>, parent_ctx: &InvocationContext) -> EventStream {
        let agent = Arc::clone(self);
        let ctx = parent_ctx.for_agent(Arc::clone(self));
        Box::pin(stream! {
            debug!(agent = %agent.name, invocation = %ctx.invocation_id, "agent run starting");

            match agent.apply_before_callbacks(&ctx).await {
                Err(e) => {
                    yield Err(e);
                    return;
                }
                Ok(Some(event)) => {
                    let skip_run = event.content.is_some();
                    yield Ok(event);
                    if skip_run {
                        return;
                    }
                }
                Ok(None) => {}
            }
            if ctx.is_ended() {
                return;
            }

            let mut inner = agent.execute(&ctx);
            while let Some(item) = inner.next().await {
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }

            match agent.apply_after_callbacks(&ctx).await {
                Err(e) => yield Err(e),
                Ok(Some(event)) => yield Ok(event),
                Ok(None) => {}
            }
        })
    }

    /// Produce the agent's event stream in live (bidirectional) mode.
    ///
    /// Loop and parallel agents do not support live mode.
    pub fn run_live(self: &Arc<Self>, parent_ctx: &InvocationContext) -> EventStream {
        let agent = Arc::clone(self);
        let ctx = parent_ctx.for_agent(Arc::clone(self));
        Box::pin(stream! {
            debug!(agent = %agent.name, invocation = %ctx.invocation_id, "agent live run starting");

            match agent.apply_before_callbacks(&ctx).await {
                Err(e) => {
                    yield Err(e);
                    return;
                }
                Ok(Some(event)) => {
                    let skip_run = event.content.is_some();
                    yield Ok(event);
                    if skip_run {
                        return;
                    }
                }
                Ok(None) => {}
            }
            if ctx.is_ended() {
                return;
            }

            let mut inner: EventStream = match &agent.kind {
                AgentKind::Sequential => sequential::execute_live(Arc::clone(&agent), ctx.clone()),
                AgentKind::Llm(_) => llm_agent::execute_live(Arc::clone(&agent), ctx.clone()),
                AgentKind::Parallel | AgentKind::Loop { .. } => {
                    yield Err(AgentError::not_implemented(format!(
                        "live mode for agent '{}'",
                        agent.name
                    )));
                    return;
                }
            };
            while let Some(item) = inner.next().await {
                let is_err = item.is_err();
                yield item;
                if is_err {
                    return;
                }
            }

            match agent.apply_after_callbacks(&ctx).await {
                Err(e) => yield Err(e),
                Ok(Some(event)) => yield Ok(event),
                Ok(None) => {}
            }
        })
    }

    /// Dispatch on the agent kind in non-live mode.
    fn execute(self: &Arc<Self>, ctx: &InvocationContext) -> EventStream {
        match &self.kind {
            AgentKind::Sequential => sequential::execute(Arc::clone(self), ctx.clone()),
            AgentKind::Parallel => parallel::execute(Arc::clone(self), ctx.clone()),
            AgentKind::Loop { max_iterations } => {
                loop_agent::execute(Arc::clone(self), ctx.clone(), *max_iterations)
            }
            AgentKind::Llm(_) => llm_agent::execute(Arc::clone(self), ctx.clone()),
        }
    }

    /// Run the before-agent chain. A content override yields an event and
    /// skips execution; bare staged actions yield an action-only event.
    async fn apply_before_callbacks(&self, ctx: &InvocationContext) -> Result<Option<Event>> {
        if self.before_agent_callbacks.is_empty() {
            return Ok(None);
        }
        let cb_ctx = CallbackContext::new(ctx);
        let override_content = run_agent_callbacks(&self.before_agent_callbacks, &cb_ctx).await?;
        let actions = cb_ctx.take_actions();
        match override_content {
            Some(content) => Ok(Some(
                self.new_event(ctx).with_content(content).with_actions(actions),
            )),
            None if !actions.is_empty() => Ok(Some(self.new_event(ctx).with_actions(actions))),
            None => Ok(None),
        }
    }

    /// Run the after-agent chain symmetrically.
    async fn apply_after_callbacks(&self, ctx: &InvocationContext) -> Result<Option<Event>> {
        if self.after_agent_callbacks.is_empty() {
            return Ok(None);
        }
        let cb_ctx = CallbackContext::new(ctx);
        let override_content = run_agent_callbacks(&self.after_agent_callbacks, &cb_ctx).await?;
        let actions = cb_ctx.take_actions();
        match override_content {
            Some(content) => Ok(Some(
                self.new_event(ctx).with_content(content).with_actions(actions),
            )),
            None if !actions.is_empty() => Ok(Some(self.new_event(ctx).with_actions(actions))),
            None => Ok(None),
        }
    }

    /// An empty event authored by this agent within the invocation.
    pub(crate) fn new_event(&self, ctx: &InvocationContext) -> Event {
        Event::new(self.name.clone())
            .with_invocation_id(ctx.invocation_id.clone())
            .with_branch(ctx.branch.clone())
    }
}

/// Builder for composite agents; LLM agents use [`LlmAgentBuilder`].
pub struct AgentBuilder {
    name: String,
    description: String,
    sub_agents: Vec<Arc<Agent>>,
    before_agent_callbacks: Vec<Arc<dyn AgentCallback>>,
    after_agent_callbacks: Vec<Arc<dyn AgentCallback>>,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.name)
            .field("sub_agents", &self.sub_agents.len())
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Start building an agent with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sub_agents: Vec::new(),
            before_agent_callbacks: Vec::new(),
            after_agent_callbacks: Vec::new(),
        }
    }

    /// Set the description (used when advertising transfer targets).
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append one child.
    #[must_use]
    pub fn sub_agent(mut self, agent: Arc<Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    /// Append children.
    #[must_use]
    pub fn sub_agents(mut self, agents: Vec<Arc<Agent>>) -> Self {
        self.sub_agents.extend(agents);
        self
    }

    /// Append a before-agent callback.
    #[must_use]
    pub fn before_agent(mut self, callback: impl AgentCallback + 'static) -> Self {
        self.before_agent_callbacks.push(Arc::new(callback));
        self
    }

    /// Append an after-agent callback.
    #[must_use]
    pub fn after_agent(mut self, callback: impl AgentCallback + 'static) -> Self {
        self.after_agent_callbacks.push(Arc::new(callback));
        self
    }

    /// Build a sequential agent.
    pub fn sequential(self) -> Result<Arc<Agent>> {
        self.build_kind(AgentKind::Sequential)
    }

    /// Build a parallel agent.
    pub fn parallel(self) -> Result<Arc<Agent>> {
        self.build_kind(AgentKind::Parallel)
    }

    /// Build a loop agent.
    pub fn looping(self, max_iterations: usize) -> Result<Arc<Agent>> {
        self.build_kind(AgentKind::Loop { max_iterations })
    }

    /// Build an agent of the given kind, wiring parent pointers.
    pub(crate) fn build_kind(self, kind: AgentKind) -> Result<Arc<Agent>> {
        if !state::is_identifier(&self.name) || self.name == USER_AUTHOR {
            return Err(AgentError::configuration(format!(
                "invalid agent name '{}'",
                self.name
            )));
        }
        let agent = Arc::new(Agent {
            name: self.name,
            description: self.description,
            kind,
            sub_agents: self.sub_agents,
            parent: OnceLock::new(),
            before_agent_callbacks: self.before_agent_callbacks,
            after_agent_callbacks: self.after_agent_callbacks,
        });
        for child in &agent.sub_agents {
            if child.parent.set(Arc::downgrade(&agent)).is_err() {
                return Err(AgentError::configuration(format!(
                    "agent '{}' already has a parent; trees are built leaves-first with single ownership",
                    child.name()
                )));
            }
        }
        Ok(agent)
    }
}

/// Validate that every name in the tree is unique.
pub fn validate_tree(root: &Arc<Agent>) -> Result<()> {
    fn walk(agent: &Arc<Agent>, seen: &mut std::collections::HashSet<String>) -> Result<()> {
        if !seen.insert(agent.name().to_string()) {
            return Err(AgentError::configuration(format!(
                "duplicate agent name '{}' in tree",
                agent.name()
            )));
        }
        for child in agent.sub_agents() {
            walk(child, seen)?;
        }
        Ok(())
    }
    walk(root, &mut std::collections::HashSet::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_navigation() {
        let leaf_a = Agent::sequential("leaf_a", Vec::new()).expect("leaf");
        let leaf_b = Agent::sequential("leaf_b", Vec::new()).expect("leaf");
        let mid = Agent::parallel("mid", vec![Arc::clone(&leaf_a), leaf_b]).expect("mid");
        let root = Agent::sequential("root", vec![mid]).expect("root");

        assert_eq!(leaf_a.root_agent().name(), "root");
        assert_eq!(root.find_agent("leaf_b").expect("found").name(), "leaf_b");
        assert_eq!(root.find_sub_agent("mid").expect("found").name(), "mid");
        assert!(root.find_agent("nope").is_none());
    }

    #[test]
    fn test_single_parent_enforced() {
        let leaf = Agent::sequential("leaf", Vec::new()).expect("leaf");
        let _first = Agent::sequential("first", vec![Arc::clone(&leaf)]).expect("first");
        let second = Agent::sequential("second", vec![leaf]);
        assert!(second.is_err());
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(Agent::sequential("has space", Vec::new()).is_err());
        assert!(Agent::sequential("user", Vec::new()).is_err());
        assert!(Agent::sequential("ok_name", Vec::new()).is_ok());
    }

    #[test]
    fn test_validate_tree_rejects_duplicates() {
        let a = Agent::sequential("twin", Vec::new()).expect("a");
        let b = Agent::sequential("twin2", Vec::new()).expect("b");
        let root = Agent::sequential("root", vec![a, b]).expect("root");
        assert!(validate_tree(&root).is_ok());

        let c = Agent::sequential("dup", Vec::new()).expect("c");
        let d = Agent::sequential("dup2", Vec::new()).expect("d");
        let mid = Agent::sequential("dup3", vec![c, d]).expect("mid");
        let root2 = Agent::sequential("dup", vec![mid]);
        // The root itself reuses a child's name.
        let root2 = root2.expect("built");
        assert!(validate_tree(&root2).is_err());
    }
}
