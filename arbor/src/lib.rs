//! Arbor is a hierarchical, event-streaming orchestration framework for
//! LLM-powered agents.
//!
//! An agent is a node in a composition tree that, when run, emits an
//! ordered stream of structured [`event::Event`]s produced by cooperation
//! between a language model, a set of tools, and the agent's sub-agents.
//!
//! The three core subsystems:
//!
//! - **Agent composition and dispatch** — the four agent kinds
//!   (sequential, parallel, loop, llm) with their branching rules, event
//!   propagation, and cancellation semantics ([`agent`]).
//! - **The LLM flow pipeline** — request processors, the model call, and
//!   response processors, with function-call handling, authentication
//!   resumption, and agent transfer ([`flow`]).
//! - **Function-call orchestration** — parallel tool invocation with
//!   before/after callbacks, call/response correlation by id, merged
//!   response events, and credential-request injection.
//!
//! Model providers, tools, session stores, artifact stores, memory, code
//! executors, and planners are consumed behind traits; in-memory
//! implementations ship for testing and local runs.
//!
//! # Example
//!
//! ```rust,ignore
//! let agent = LlmAgentBuilder::new("assistant")
//!     .model(my_model)
//!     .instruction("You help with {topic}.")
//!     .tool(my_tool)
//!     .build()?;
//!
//! let sessions = Arc::new(InMemorySessionService::new());
//! sessions.create_session("app", "user", JsonMap::new(), Some("s1".into())).await?;
//! let runner = Runner::new("app", agent, sessions)?;
//! let mut events = runner.run("user", "s1", Content::user_text("hi"), RunConfig::default());
//! while let Some(event) = events.next().await { /* ... */ }
//! ```

pub mod agent;
pub mod artifact;
pub mod auth;
pub mod code_executor;
pub mod content;
pub mod context;
pub mod error;
pub mod event;
pub mod flow;
pub mod live;
pub mod memory;
pub mod model;
pub mod planner;
pub mod runner;
pub mod session;
pub mod tool;

pub mod prelude;

pub use error::{AgentError, Result};
