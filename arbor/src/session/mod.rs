//! Sessions and the session service contract.
//!
//! A session is the append-only event history of one conversation plus the
//! state those events have built up. All state writes flow through
//! [`SessionService::append_event`], which applies the event's
//! `state_delta` atomically with the append — event order is the sole
//! serialization of state.

pub mod state;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::content::JsonMap;
use crate::error::{AgentError, Result};
use crate::event::Event;

/// One conversation: identity, state, and the append-only event history.
///
/// Shared between the owning service and invocation contexts via `Arc`;
/// interior locks keep read scopes short and are never held across awaits.
#[derive(Debug)]
pub struct Session {
    /// Session id.
    pub id: String,
    /// Owning application name.
    pub app_name: String,
    /// Owning user id.
    pub user_id: String,
    state: RwLock<JsonMap>,
    events: RwLock<Vec<Event>>,
    last_update_time: RwLock<DateTime<Utc>>,
}

impl Session {
    /// Create a session with the given identity and initial state.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        state: JsonMap,
    ) -> Self {
        Self {
            id: id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            state: RwLock::new(state),
            events: RwLock::new(Vec::new()),
            last_update_time: RwLock::new(Utc::now()),
        }
    }

    /// Snapshot of the current state map.
    #[must_use]
    pub fn state_snapshot(&self) -> JsonMap {
        self.state.read().expect("state lock poisoned").clone()
    }

    /// Read a single state value.
    #[must_use]
    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .expect("state lock poisoned")
            .get(key)
            .cloned()
    }

    /// Merge entries into the state map directly. Reserved for `temp:`
    /// scoped writes; everything else goes through `append_event`.
    pub fn merge_temp_state(&self, entries: JsonMap) {
        let mut state = self.state.write().expect("state lock poisoned");
        for (key, value) in entries {
            state.insert(key, value);
        }
    }

    /// Snapshot of the event history.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().expect("events lock poisoned").clone()
    }

    /// Number of events in the history.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.read().expect("events lock poisoned").len()
    }

    /// Time of the last append.
    #[must_use]
    pub fn last_update_time(&self) -> DateTime<Utc> {
        *self
            .last_update_time
            .read()
            .expect("update-time lock poisoned")
    }

    /// Apply an event: merge its state delta (skipping `temp:` keys) and
    /// push it onto the history. Called by session services only.
    fn apply(&self, event: &Event) {
        {
            let mut state = self.state.write().expect("state lock poisoned");
            for (key, value) in &event.actions.state_delta {
                if state::is_temp_key(key) {
                    continue;
                }
                state.insert(key.clone(), value.clone());
            }
        }
        self.events
            .write()
            .expect("events lock poisoned")
            .push(event.clone());
        *self
            .last_update_time
            .write()
            .expect("update-time lock poisoned") = event.timestamp;
    }
}

/// The session persistence contract consumed by the core.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a session. A random id is generated when none is given.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        state: JsonMap,
        session_id: Option<String>,
    ) -> Result<Arc<Session>>;

    /// Look up a session.
    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Arc<Session>>>;

    /// Append an event, applying its `state_delta` atomically with the
    /// append. Partial events are returned unchanged without persisting.
    async fn append_event(&self, session: &Session, event: Event) -> Result<Event>;

    /// Delete a session.
    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<()>;
}

/// An in-memory [`SessionService`].
#[derive(Debug, Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<(String, String, String), Arc<Session>>>,
}

impl InMemorySessionService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        state: JsonMap,
        session_id: Option<String>,
    ) -> Result<Arc<Session>> {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let session = Arc::new(Session::new(id.clone(), app_name, user_id, state));
        let key = (app_name.to_string(), user_id.to_string(), id);
        let mut sessions = self.sessions.write().expect("sessions lock poisoned");
        if sessions.contains_key(&key) {
            return Err(AgentError::configuration(format!(
                "session '{}' already exists",
                key.2
            )));
        }
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Arc<Session>>> {
        let key = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        Ok(self
            .sessions
            .read()
            .expect("sessions lock poisoned")
            .get(&key)
            .cloned())
    }

    async fn append_event(&self, session: &Session, event: Event) -> Result<Event> {
        if event.partial {
            return Ok(event);
        }
        session.apply(&event);
        Ok(event)
    }

    async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str) -> Result<()> {
        let key = (
            app_name.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        );
        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventActions;
    use serde_json::json;

    fn delta_event(key: &str, value: Value) -> Event {
        let mut actions = EventActions::new();
        actions.state_delta.insert(key.to_string(), value);
        Event::new("agent").with_actions(actions)
    }

    #[tokio::test]
    async fn test_append_event_applies_state_delta_in_order() {
        let service = InMemorySessionService::new();
        let session = service
            .create_session("app", "user", JsonMap::new(), Some("s1".to_string()))
            .await
            .expect("create");

        service
            .append_event(&session, delta_event("k", json!(1)))
            .await
            .expect("append");
        service
            .append_event(&session, delta_event("k", json!(2)))
            .await
            .expect("append");

        assert_eq!(session.state_get("k"), Some(json!(2)));
        assert_eq!(session.event_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_events_are_not_persisted() {
        let service = InMemorySessionService::new();
        let session = service
            .create_session("app", "user", JsonMap::new(), None)
            .await
            .expect("create");

        let partial = delta_event("k", json!(1)).with_partial(true);
        service.append_event(&session, partial).await.expect("append");

        assert_eq!(session.event_count(), 0);
        assert_eq!(session.state_get("k"), None);
    }

    #[tokio::test]
    async fn test_temp_keys_are_not_persisted() {
        let service = InMemorySessionService::new();
        let session = service
            .create_session("app", "user", JsonMap::new(), None)
            .await
            .expect("create");

        service
            .append_event(&session, delta_event("temp:tok", json!("x")))
            .await
            .expect("append");

        assert_eq!(session.state_get("temp:tok"), None);
    }

    #[tokio::test]
    async fn test_get_session_round_trip() {
        let service = InMemorySessionService::new();
        service
            .create_session("app", "user", JsonMap::new(), Some("s1".to_string()))
            .await
            .expect("create");

        let found = service.get_session("app", "user", "s1").await.expect("get");
        assert!(found.is_some());
        assert!(
            service
                .get_session("app", "user", "missing")
                .await
                .expect("get")
                .is_none()
        );
    }
}
