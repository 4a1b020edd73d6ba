//! The event record — one unit of output produced during a run.
//!
//! Events are append-only within a session: once yielded to a consumer an
//! event is treated as immutable. Builder methods set fields before the
//! first yield.

mod actions;

pub use actions::EventActions;

use std::collections::HashSet;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::{Content, FunctionCall, FunctionResponse};
use crate::error::Result;

/// Type alias for one item of an agent's output stream.
pub type EventItem = Result<Event>;

/// Type alias for the boxed stream of events every `run` produces.
pub type EventStream = Pin<Box<dyn Stream<Item = EventItem> + Send>>;

/// Author name used for events originating from the user.
pub const USER_AUTHOR: &str = "user";

/// One unit of produced output, carrying content, author, actions, and
/// correlation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: String,
    /// Id of the invocation that produced this event.
    pub invocation_id: String,
    /// The producing agent's name, or [`USER_AUTHOR`].
    pub author: String,
    /// Dotted path of composite agents scoping this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// The payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Requested side effects.
    #[serde(default)]
    pub actions: EventActions,
    /// Ids of function calls whose responses may arrive in a future
    /// invocation.
    #[serde(default)]
    pub long_running_tool_ids: HashSet<String>,
    /// Whether this is an incremental chunk of a larger response.
    #[serde(default)]
    pub partial: bool,
    /// Whether the model signalled end of turn (live mode).
    #[serde(default)]
    pub turn_complete: bool,
    /// Whether generation was interrupted (live mode).
    #[serde(default)]
    pub interrupted: bool,
    /// Error code when the producing step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Error message when the producing step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event with a fresh id and now-timestamp.
    #[must_use]
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            id: Self::new_id(),
            invocation_id: String::new(),
            author: author.into(),
            branch: None,
            content: None,
            actions: EventActions::default(),
            long_running_tool_ids: HashSet::new(),
            partial: false,
            turn_complete: false,
            interrupted: false,
            error_code: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    /// Generate a fresh event id.
    #[must_use]
    pub fn new_id() -> String {
        format!("e-{}", Uuid::new_v4().simple())
    }

    /// Set the invocation id.
    #[must_use]
    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    /// Set the content.
    #[must_use]
    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    /// Set the actions.
    #[must_use]
    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions = actions;
        self
    }

    /// Set the partial flag.
    #[must_use]
    pub const fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// The function-call parts of the content, in order.
    #[must_use]
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(crate::content::Part::as_function_call)
            .collect()
    }

    /// The function-response parts of the content, in order.
    #[must_use]
    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(crate::content::Part::as_function_response)
            .collect()
    }

    /// Whether this event closes the current turn for its agent: no
    /// pending tool calls, not an incremental chunk, and not a trailing
    /// code-execution result the model still has to react to.
    #[must_use]
    pub fn is_final_response(&self) -> bool {
        if self.actions.skip_summarization || !self.long_running_tool_ids.is_empty() {
            return true;
        }
        self.function_calls().is_empty()
            && self.function_responses().is_empty()
            && !self.partial
            && !self.has_trailing_code_execution_result()
    }

    /// Whether the last content part is a code-execution result block.
    #[must_use]
    pub fn has_trailing_code_execution_result(&self) -> bool {
        self.content
            .as_ref()
            .and_then(|c| c.parts.last())
            .and_then(crate::content::Part::as_text)
            .is_some_and(|t| t.trim_start().starts_with(crate::code_executor::EXECUTION_RESULT_OPEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{JsonMap, Part};

    #[test]
    fn test_new_event_has_fresh_id() {
        let a = Event::new("agent");
        let b = Event::new("agent");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("e-"));
    }

    #[test]
    fn test_function_call_accessors_preserve_order() {
        let event = Event::new("agent").with_content(Content::model(vec![
            Part::function_call("x", JsonMap::new()),
            Part::text("between"),
            Part::function_call("y", JsonMap::new()),
        ]));
        let calls = event.function_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "x");
        assert_eq!(calls[1].name, "y");
    }

    #[test]
    fn test_final_response_rules() {
        let plain = Event::new("agent").with_content(Content::model_text("done"));
        assert!(plain.is_final_response());

        let partial = Event::new("agent")
            .with_content(Content::model_text("d"))
            .with_partial(true);
        assert!(!partial.is_final_response());

        let with_call = Event::new("agent").with_content(Content::model(vec![
            Part::function_call("x", JsonMap::new()),
        ]));
        assert!(!with_call.is_final_response());

        let mut long_running = with_call.clone();
        long_running
            .long_running_tool_ids
            .insert("id-1".to_string());
        assert!(long_running.is_final_response());
    }
}
