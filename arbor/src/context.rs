//! Per-run contexts.
//!
//! [`InvocationContext`] is created at the top of a run and handed down the
//! agent tree; composite agents clone it with an adjusted agent pointer or
//! branch. [`ReadonlyContext`] and [`CallbackContext`] are the narrow views
//! handed to instruction providers, toolsets, and callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use uuid::Uuid;

use crate::agent::Agent;
use crate::artifact::ArtifactService;
use crate::content::{Blob, Content, JsonMap};
use crate::error::{AgentError, Result};
use crate::event::EventActions;
use crate::live::{ActiveStreamingTool, LiveRequestQueue, TranscriptionEntry};
use crate::memory::MemoryService;
use crate::session::{Session, SessionService, state};

/// How model output is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingMode {
    /// One unary response per step.
    #[default]
    None,
    /// Server-streamed partial responses per step.
    Sse,
    /// Bidirectional live connection.
    Bidi,
}

/// Per-run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// How model output is delivered.
    pub streaming_mode: StreamingMode,
    /// Modalities the model should respond with in live mode.
    pub response_modalities: Vec<String>,
    /// Whether the transport supports compositional function calling.
    pub support_cfc: bool,
    /// Ceiling on model calls per invocation; 0 disables the ceiling.
    pub max_llm_calls: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            streaming_mode: StreamingMode::default(),
            response_modalities: Vec::new(),
            support_cfc: false,
            max_llm_calls: 500,
        }
    }
}

/// Per-run mutable state, owned for the duration of one top-level run.
///
/// Cloning produces a view onto the same run: the end-invocation flag,
/// call counter, and live tables are shared; the agent pointer and branch
/// are per-clone.
#[derive(Clone)]
pub struct InvocationContext {
    /// Session persistence.
    pub session_service: Arc<dyn SessionService>,
    /// Artifact persistence, if configured.
    pub artifact_service: Option<Arc<dyn ArtifactService>>,
    /// Long-term memory, if configured.
    pub memory_service: Option<Arc<dyn MemoryService>>,
    /// The agent currently being run.
    pub agent: Arc<Agent>,
    /// The session this run appends to.
    pub session: Arc<Session>,
    /// Id of this invocation; stamped onto every event it produces.
    pub invocation_id: String,
    /// Dotted path of composite agents traversed so far.
    pub branch: Option<String>,
    /// The user content that started this invocation.
    pub user_content: Option<Content>,
    /// Run configuration.
    pub run_config: RunConfig,
    /// Client-to-model queue in live mode.
    pub live_request_queue: Option<LiveRequestQueue>,
    /// Cached live audio/text not yet turned into regular history.
    pub transcription_cache: Arc<Mutex<Vec<TranscriptionEntry>>>,
    /// Running streaming-tool tasks by tool name.
    pub active_streaming_tools: Arc<Mutex<std::collections::HashMap<String, ActiveStreamingTool>>>,
    end_invocation: Arc<AtomicBool>,
    llm_call_count: Arc<AtomicUsize>,
}

impl InvocationContext {
    /// Create the context for a fresh invocation.
    #[must_use]
    pub fn new(
        agent: Arc<Agent>,
        session: Arc<Session>,
        session_service: Arc<dyn SessionService>,
        run_config: RunConfig,
    ) -> Self {
        Self {
            session_service,
            artifact_service: None,
            memory_service: None,
            agent,
            session,
            invocation_id: Self::new_invocation_id(),
            branch: None,
            user_content: None,
            run_config,
            live_request_queue: None,
            transcription_cache: Arc::new(Mutex::new(Vec::new())),
            active_streaming_tools: Arc::new(Mutex::new(std::collections::HashMap::new())),
            end_invocation: Arc::new(AtomicBool::new(false)),
            llm_call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Generate a fresh invocation id.
    #[must_use]
    pub fn new_invocation_id() -> String {
        format!("inv-{}", Uuid::new_v4().simple())
    }

    /// Set the artifact service.
    #[must_use]
    pub fn with_artifact_service(mut self, service: Arc<dyn ArtifactService>) -> Self {
        self.artifact_service = Some(service);
        self
    }

    /// Set the memory service.
    #[must_use]
    pub fn with_memory_service(mut self, service: Arc<dyn MemoryService>) -> Self {
        self.memory_service = Some(service);
        self
    }

    /// Set the starting user content.
    #[must_use]
    pub fn with_user_content(mut self, content: Content) -> Self {
        self.user_content = Some(content);
        self
    }

    /// Set the live request queue.
    #[must_use]
    pub fn with_live_request_queue(mut self, queue: LiveRequestQueue) -> Self {
        self.live_request_queue = Some(queue);
        self
    }

    /// A view onto the same run with a different current agent.
    #[must_use]
    pub fn for_agent(&self, agent: Arc<Agent>) -> Self {
        let mut ctx = self.clone();
        ctx.agent = agent;
        ctx
    }

    /// A view onto the same run with the branch extended by `name`.
    #[must_use]
    pub fn with_branch_child(&self, name: &str) -> Self {
        let mut ctx = self.clone();
        ctx.branch = Some(match &self.branch {
            Some(parent) => format!("{parent}.{name}"),
            None => name.to_string(),
        });
        ctx
    }

    /// Request a clean cooperative stop of the whole invocation.
    pub fn end_invocation(&self) {
        self.end_invocation.store(true, Ordering::SeqCst);
    }

    /// Whether a cooperative stop was requested.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.end_invocation.load(Ordering::SeqCst)
    }

    /// Count one model call against the per-invocation ceiling.
    pub fn increment_llm_call_count(&self) -> Result<()> {
        let calls = self.llm_call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = self.run_config.max_llm_calls;
        if limit > 0 && calls > limit {
            return Err(AgentError::LlmCallsLimitExceeded { limit });
        }
        Ok(())
    }

    /// Lock the transcription cache.
    pub fn transcription_cache(&self) -> MutexGuard<'_, Vec<TranscriptionEntry>> {
        self.transcription_cache
            .lock()
            .expect("transcription cache poisoned")
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("agent", &self.agent.name())
            .field("branch", &self.branch)
            .field("session", &self.session.id)
            .finish_non_exhaustive()
    }
}

/// Read-only view for instruction providers and toolsets.
#[derive(Debug, Clone)]
pub struct ReadonlyContext {
    /// Id of the current invocation.
    pub invocation_id: String,
    /// Name of the current agent.
    pub agent_name: String,
    /// Branch of the current agent.
    pub branch: Option<String>,
    /// Snapshot of session state.
    pub state: JsonMap,
    /// The user content that started the invocation.
    pub user_content: Option<Content>,
}

impl ReadonlyContext {
    /// Build a read-only snapshot of the invocation.
    #[must_use]
    pub fn new(ctx: &InvocationContext) -> Self {
        Self {
            invocation_id: ctx.invocation_id.clone(),
            agent_name: ctx.agent.name().to_string(),
            branch: ctx.branch.clone(),
            state: ctx.session.state_snapshot(),
            user_content: ctx.user_content.clone(),
        }
    }
}

/// Mutable view handed to lifecycle callbacks; collects the actions the
/// callback requests so the caller can fold them into the next event.
pub struct CallbackContext {
    /// Id of the current invocation.
    pub invocation_id: String,
    /// Name of the current agent.
    pub agent_name: String,
    /// Branch of the current agent.
    pub branch: Option<String>,
    /// The user content that started the invocation.
    pub user_content: Option<Content>,
    session: Arc<Session>,
    artifact_service: Option<Arc<dyn ArtifactService>>,
    actions: Mutex<EventActions>,
}

impl CallbackContext {
    /// Build a callback view of the invocation.
    #[must_use]
    pub fn new(ctx: &InvocationContext) -> Self {
        Self {
            invocation_id: ctx.invocation_id.clone(),
            agent_name: ctx.agent.name().to_string(),
            branch: ctx.branch.clone(),
            user_content: ctx.user_content.clone(),
            session: Arc::clone(&ctx.session),
            artifact_service: ctx.artifact_service.clone(),
            actions: Mutex::new(EventActions::default()),
        }
    }

    /// Read a state value: pending writes shadow committed session state.
    #[must_use]
    pub fn state_get(&self, key: &str) -> Option<Value> {
        let pending = self
            .actions
            .lock()
            .expect("actions lock poisoned")
            .state_delta
            .get(key)
            .cloned();
        pending.or_else(|| self.session.state_get(key))
    }

    /// Stage a state write into the pending delta.
    pub fn set_state(&self, key: &str, value: Value) -> Result<()> {
        state::validate_key(key)?;
        self.actions
            .lock()
            .expect("actions lock poisoned")
            .state_delta
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Load an artifact version (`None` selects the latest).
    pub async fn load_artifact(&self, filename: &str, version: Option<u64>) -> Result<Option<Blob>> {
        let service = self
            .artifact_service
            .as_ref()
            .ok_or_else(|| AgentError::configuration("no artifact service configured"))?;
        service
            .load_artifact(
                &self.session.app_name,
                &self.session.user_id,
                &self.session.id,
                filename,
                version,
            )
            .await
    }

    /// Save an artifact, staging the version bump into the pending delta.
    pub async fn save_artifact(&self, filename: &str, artifact: Blob) -> Result<u64> {
        let service = self
            .artifact_service
            .as_ref()
            .ok_or_else(|| AgentError::configuration("no artifact service configured"))?;
        let version = service
            .save_artifact(
                &self.session.app_name,
                &self.session.user_id,
                &self.session.id,
                filename,
                artifact,
            )
            .await?;
        self.actions
            .lock()
            .expect("actions lock poisoned")
            .artifact_delta
            .insert(filename.to_string(), version);
        Ok(version)
    }

    /// Mutate the pending actions directly.
    pub fn with_actions<R>(&self, f: impl FnOnce(&mut EventActions) -> R) -> R {
        f(&mut self.actions.lock().expect("actions lock poisoned"))
    }

    /// Snapshot the pending actions.
    #[must_use]
    pub fn actions(&self) -> EventActions {
        self.actions.lock().expect("actions lock poisoned").clone()
    }

    /// Drain the pending actions.
    #[must_use]
    pub fn take_actions(&self) -> EventActions {
        std::mem::take(&mut self.actions.lock().expect("actions lock poisoned"))
    }
}

impl std::fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackContext")
            .field("invocation_id", &self.invocation_id)
            .field("agent_name", &self.agent_name)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::session::InMemorySessionService;

    fn test_ctx() -> InvocationContext {
        let agent = Agent::sequential("root", Vec::new()).expect("agent");
        let session = Arc::new(Session::new("s1", "app", "u", JsonMap::new()));
        InvocationContext::new(
            agent,
            session,
            Arc::new(InMemorySessionService::new()),
            RunConfig::default(),
        )
    }

    #[test]
    fn test_branch_extension() {
        let ctx = test_ctx();
        let child = ctx.with_branch_child("fan");
        assert_eq!(child.branch.as_deref(), Some("fan"));
        let grandchild = child.with_branch_child("leaf");
        assert_eq!(grandchild.branch.as_deref(), Some("fan.leaf"));
    }

    #[test]
    fn test_llm_call_ceiling() {
        let mut ctx = test_ctx();
        ctx.run_config.max_llm_calls = 2;
        assert!(ctx.increment_llm_call_count().is_ok());
        assert!(ctx.increment_llm_call_count().is_ok());
        assert!(matches!(
            ctx.increment_llm_call_count(),
            Err(AgentError::LlmCallsLimitExceeded { limit: 2 })
        ));
    }

    #[test]
    fn test_end_invocation_is_shared_across_clones() {
        let ctx = test_ctx();
        let clone = ctx.with_branch_child("child");
        clone.end_invocation();
        assert!(ctx.is_ended());
    }

    #[test]
    fn test_callback_context_stages_state_writes() {
        let ctx = test_ctx();
        let cb = CallbackContext::new(&ctx);
        cb.set_state("greeting", Value::String("hi".to_string()))
            .expect("set");
        assert_eq!(cb.state_get("greeting"), Some(Value::String("hi".to_string())));
        // Staged, not committed: the session itself is untouched.
        assert_eq!(ctx.session.state_get("greeting"), None);
        let actions = cb.take_actions();
        assert_eq!(actions.state_delta.len(), 1);
    }

    #[test]
    fn test_invalid_state_key_rejected() {
        let ctx = test_ctx();
        let cb = CallbackContext::new(&ctx);
        assert!(cb.set_state("bogus:key", Value::Null).is_err());
    }
}
