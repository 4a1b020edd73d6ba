//! Side effects requested by an event's producer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::content::JsonMap;

/// The bundle of side effects an event asks its consumers to apply.
///
/// Deltas are applied in event-emission order; consumers may not reorder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    /// Skip response summarization for this tool result.
    #[serde(default)]
    pub skip_summarization: bool,

    /// Keyed updates to session state. Keys may carry an `app:`, `user:`,
    /// or `temp:` prefix to select scope.
    #[serde(default)]
    pub state_delta: JsonMap,

    /// Artifact filename to new version.
    #[serde(default)]
    pub artifact_delta: HashMap<String, u64>,

    /// Routes control to the named agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,

    /// Signals the nearest enclosing loop agent to terminate.
    #[serde(default)]
    pub escalate: bool,

    /// Function-call id to the auth exchange that call is waiting on.
    #[serde(default)]
    pub requested_auth_configs: HashMap<String, AuthConfig>,
}

impl EventActions {
    /// Create empty actions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no side effect is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.skip_summarization
            && self.state_delta.is_empty()
            && self.artifact_delta.is_empty()
            && self.transfer_to_agent.is_none()
            && !self.escalate
            && self.requested_auth_configs.is_empty()
    }

    /// Fold another action bundle into this one. Later state writes win;
    /// the first transfer target wins; boolean flags accumulate with `or`.
    pub fn merge(&mut self, other: Self) {
        self.skip_summarization |= other.skip_summarization;
        self.state_delta.extend(other.state_delta);
        self.artifact_delta.extend(other.artifact_delta);
        if self.transfer_to_agent.is_none() {
            self.transfer_to_agent = other.transfer_to_agent;
        }
        self.escalate |= other.escalate;
        self.requested_auth_configs
            .extend(other.requested_auth_configs);
    }
}
