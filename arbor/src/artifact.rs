//! The artifact service contract and an in-memory implementation.
//!
//! Artifacts are versioned named blobs scoped to an app/user/session
//! triple. Saving returns the new version; loading without a version
//! returns the latest.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::content::Blob;
use crate::error::Result;

/// The artifact persistence contract consumed by the core.
#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Save a new version of an artifact, returning its version number.
    async fn save_artifact(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
        artifact: Blob,
    ) -> Result<u64>;

    /// Load an artifact version; `None` selects the latest.
    async fn load_artifact(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
        version: Option<u64>,
    ) -> Result<Option<Blob>>;

    /// List the artifact filenames of a session.
    async fn list_artifact_keys(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<String>>;
}

/// An in-memory [`ArtifactService`].
#[derive(Debug, Default)]
pub struct InMemoryArtifactService {
    artifacts: RwLock<HashMap<String, Vec<Blob>>>,
}

impl InMemoryArtifactService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(app_name: &str, user_id: &str, session_id: &str, filename: &str) -> String {
        format!("{app_name}/{user_id}/{session_id}/{filename}")
    }
}

#[async_trait]
impl ArtifactService for InMemoryArtifactService {
    async fn save_artifact(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
        artifact: Blob,
    ) -> Result<u64> {
        let key = Self::key(app_name, user_id, session_id, filename);
        let mut artifacts = self.artifacts.write().expect("artifact lock poisoned");
        let versions = artifacts.entry(key).or_default();
        versions.push(artifact);
        Ok(versions.len() as u64 - 1)
    }

    async fn load_artifact(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        filename: &str,
        version: Option<u64>,
    ) -> Result<Option<Blob>> {
        let key = Self::key(app_name, user_id, session_id, filename);
        let artifacts = self.artifacts.read().expect("artifact lock poisoned");
        let Some(versions) = artifacts.get(&key) else {
            return Ok(None);
        };
        let blob = match version {
            Some(v) => versions.get(v as usize),
            None => versions.last(),
        };
        Ok(blob.cloned())
    }

    async fn list_artifact_keys(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<String>> {
        let prefix = format!("{app_name}/{user_id}/{session_id}/");
        let artifacts = self.artifacts.read().expect("artifact lock poisoned");
        let mut keys: Vec<String> = artifacts
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(str::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_increment_and_latest_wins() {
        let service = InMemoryArtifactService::new();
        let v0 = service
            .save_artifact("app", "u", "s", "report.txt", Blob::new("text/plain", b"one".to_vec()))
            .await
            .expect("save");
        let v1 = service
            .save_artifact("app", "u", "s", "report.txt", Blob::new("text/plain", b"two".to_vec()))
            .await
            .expect("save");
        assert_eq!((v0, v1), (0, 1));

        let latest = service
            .load_artifact("app", "u", "s", "report.txt", None)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(latest.data, b"two");

        let first = service
            .load_artifact("app", "u", "s", "report.txt", Some(0))
            .await
            .expect("load")
            .expect("present");
        assert_eq!(first.data, b"one");
    }

    #[tokio::test]
    async fn test_missing_artifact_is_none() {
        let service = InMemoryArtifactService::new();
        let loaded = service
            .load_artifact("app", "u", "s", "nope", None)
            .await
            .expect("load");
        assert!(loaded.is_none());
    }
}
