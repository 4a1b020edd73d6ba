//! The Runner: the session-appending entry point of a run.
//!
//! Ties an agent tree to the session, artifact, and memory services:
//! appends the user message, builds the invocation context, streams the
//! root agent's events, and persists every non-partial event (applying
//! its state delta) before handing it to the caller — so event order is
//! the sole serialization of session state.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt as _;
use tracing::info;

use crate::agent::{Agent, validate_tree};
use crate::artifact::ArtifactService;
use crate::content::Content;
use crate::context::{InvocationContext, RunConfig, StreamingMode};
use crate::error::{AgentError, Result};
use crate::event::{Event, EventStream, USER_AUTHOR};
use crate::live::LiveRequestQueue;
use crate::memory::MemoryService;
use crate::session::SessionService;

/// Drives an agent tree against the configured services.
pub struct Runner {
    app_name: String,
    agent: Arc<Agent>,
    session_service: Arc<dyn SessionService>,
    artifact_service: Option<Arc<dyn ArtifactService>>,
    memory_service: Option<Arc<dyn MemoryService>>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("app_name", &self.app_name)
            .field("agent", &self.agent.name())
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a runner, validating the agent tree.
    pub fn new(
        app_name: impl Into<String>,
        agent: Arc<Agent>,
        session_service: Arc<dyn SessionService>,
    ) -> Result<Self> {
        validate_tree(&agent)?;
        Ok(Self {
            app_name: app_name.into(),
            agent,
            session_service,
            artifact_service: None,
            memory_service: None,
        })
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

    /// The root agent.
    #[must_use]
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Run one turn: append the user message, stream the agent, persist
    /// every non-partial event as it passes through.
    pub fn run(
        &self,
        user_id: &str,
        session_id: &str,
        new_message: Content,
        run_config: RunConfig,
    ) -> EventStream {
        let app_name = self.app_name.clone();
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        let agent = Arc::clone(&self.agent);
        let session_service = Arc::clone(&self.session_service);
        let artifact_service = self.artifact_service.clone();
        let memory_service = self.memory_service.clone();

        Box::pin(stream! {
            let session = match session_service.get_session(&app_name, &user_id, &session_id).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    yield Err(AgentError::configuration(format!(
                        "session '{session_id}' not found"
                    )));
                    return;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut ctx = InvocationContext::new(
                Arc::clone(&agent),
                Arc::clone(&session),
                Arc::clone(&session_service),
                run_config,
            )
            .with_user_content(new_message.clone());
            if let Some(artifacts) = artifact_service {
                ctx = ctx.with_artifact_service(artifacts);
            }
            if let Some(memory) = memory_service {
                ctx = ctx.with_memory_service(memory);
            }
            info!(invocation = %ctx.invocation_id, agent = %agent.name(), "run starting");

            let user_event = Event::new(USER_AUTHOR)
                .with_invocation_id(ctx.invocation_id.clone())
                .with_content(new_message);
            if let Err(e) = session_service.append_event(&session, user_event).await {
                yield Err(e);
                return;
            }

            let mut events = agent.run(&ctx);
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        if !event.partial
                            && let Err(e) =
                                session_service.append_event(&session, event.clone()).await
                        {
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

    /// Run in live mode: events stream from a bidirectional connection
    /// fed by `queue`.
    pub fn run_live(
        &self,
        user_id: &str,
        session_id: &str,
        queue: LiveRequestQueue,
        mut run_config: RunConfig,
    ) -> EventStream {
        run_config.streaming_mode = StreamingMode::Bidi;
        let app_name = self.app_name.clone();
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        let agent = Arc::clone(&self.agent);
        let session_service = Arc::clone(&self.session_service);
        let artifact_service = self.artifact_service.clone();
        let memory_service = self.memory_service.clone();

        Box::pin(stream! {
            let session = match session_service.get_session(&app_name, &user_id, &session_id).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    yield Err(AgentError::configuration(format!(
                        "session '{session_id}' not found"
                    )));
                    return;
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut ctx = InvocationContext::new(
                Arc::clone(&agent),
                Arc::clone(&session),
                Arc::clone(&session_service),
                run_config,
            )
            .with_live_request_queue(queue);
            if let Some(artifacts) = artifact_service {
                ctx = ctx.with_artifact_service(artifacts);
            }
            if let Some(memory) = memory_service {
                ctx = ctx.with_memory_service(memory);
            }
            info!(invocation = %ctx.invocation_id, agent = %agent.name(), "live run starting");

            let mut events = agent.run_live(&ctx);
            while let Some(item) = events.next().await {
                match item {
                    Ok(event) => {
                        if !event.partial
                            && let Err(e) =
                                session_service.append_event(&session, event.clone()).await
                        {
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
}
