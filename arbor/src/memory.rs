//! The long-term memory contract and an in-memory keyword implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::content::Content;
use crate::error::Result;
use crate::session::Session;

/// One recalled piece of conversation.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Author of the remembered content.
    pub author: String,
    /// The remembered content.
    pub content: Content,
    /// When the content was produced.
    pub timestamp: DateTime<Utc>,
}

/// The memory contract consumed by the core.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Ingest a session's events into memory.
    async fn add_session_to_memory(&self, session: &Session) -> Result<()>;

    /// Search memory for content relevant to a query.
    async fn search_memory(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<MemoryEntry>>;
}

/// An in-memory [`MemoryService`] using word-overlap matching.
#[derive(Debug, Default)]
pub struct InMemoryMemoryService {
    entries: RwLock<HashMap<(String, String), Vec<MemoryEntry>>>,
}

impl InMemoryMemoryService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn add_session_to_memory(&self, session: &Session) -> Result<()> {
        let key = (session.app_name.clone(), session.user_id.clone());
        let mut entries = self.entries.write().expect("memory lock poisoned");
        let bucket = entries.entry(key).or_default();
        for event in session.events() {
            if let Some(content) = event.content
                && !content.text().is_empty()
            {
                bucket.push(MemoryEntry {
                    author: event.author,
                    content,
                    timestamp: event.timestamp,
                });
            }
        }
        Ok(())
    }

    async fn search_memory(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<MemoryEntry>> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let key = (app_name.to_string(), user_id.to_string());
        let entries = self.entries.read().expect("memory lock poisoned");
        let Some(bucket) = entries.get(&key) else {
            return Ok(Vec::new());
        };
        Ok(bucket
            .iter()
            .filter(|entry| {
                let text = entry.content.text().to_lowercase();
                words.iter().any(|w| text.contains(w))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::JsonMap;
    use crate::event::Event;

    #[tokio::test]
    async fn test_search_matches_by_keyword() {
        let service = InMemoryMemoryService::new();
        let session = Session::new("s1", "app", "u", JsonMap::new());
        let event = Event::new("helper").with_content(Content::model_text("the sky is blue"));
        let sessions = crate::session::InMemorySessionService::new();
        use crate::session::SessionService as _;
        sessions.append_event(&session, event).await.expect("append");

        service.add_session_to_memory(&session).await.expect("add");
        let hits = service.search_memory("app", "u", "BLUE").await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].author, "helper");

        let misses = service.search_memory("app", "u", "green").await.expect("search");
        assert!(misses.is_empty());
    }
}
