//! Checkpoint persistence layer
//!
//! Durable, versioned snapshots of each session's conversation state keyed
//! by (session id, namespace). Saves are optimistic: they commit only when
//! the caller's expected version is still current.

use crate::error::OrchestrationError;
use crate::models::{Checkpoint, ConversationState};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub mod postgres;
pub use postgres::PostgresCheckpointStore;

/// Trait for checkpoint persistence
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint; an empty one at version 0 if the key was never saved.
    async fn load(&self, session_id: &str, namespace: &str) -> Result<Checkpoint>;

    /// Commit `state` if the stored version still equals `expected_version`.
    /// Returns the new version, or `VersionConflict`.
    async fn save(
        &self,
        session_id: &str,
        namespace: &str,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<u64>;
}

/// In-memory checkpoint store for development and tests
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<(String, String), Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, session_id: &str, namespace: &str) -> Result<Checkpoint> {
        let checkpoints = self.checkpoints.read().await;

        Ok(checkpoints
            .get(&(session_id.to_string(), namespace.to_string()))
            .cloned()
            .unwrap_or_else(|| Checkpoint::empty(session_id, namespace)))
    }

    async fn save(
        &self,
        session_id: &str,
        namespace: &str,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<u64> {
        let key = (session_id.to_string(), namespace.to_string());

        // Compare and swap under one write guard.
        let mut checkpoints = self.checkpoints.write().await;
        let actual = checkpoints.get(&key).map(|c| c.version).unwrap_or(0);

        if actual != expected_version {
            return Err(OrchestrationError::VersionConflict {
                session_id: session_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let version = actual + 1;
        checkpoints.insert(
            key,
            Checkpoint {
                session_id: session_id.to_string(),
                namespace: namespace.to_string(),
                version,
                state: state.clone(),
                updated_at: Utc::now(),
            },
        );

        debug!(session_id, namespace, version, "Checkpoint committed");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let store = InMemoryCheckpointStore::new();
        let checkpoint = store.load("nobody", "finvoice_ai").await.unwrap();
        assert_eq!(checkpoint.version, 0);
        assert!(checkpoint.state.is_empty());
    }

    #[tokio::test]
    async fn test_save_increments_version() {
        let store = InMemoryCheckpointStore::new();
        let state = ConversationState::from_messages(vec![Message::user("hello")]);

        assert_eq!(store.save("u1", "ns", &state, 0).await.unwrap(), 1);
        assert_eq!(store.save("u1", "ns", &state, 1).await.unwrap(), 2);

        let loaded = store.load("u1", "ns").await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.state, state);
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let store = InMemoryCheckpointStore::new();
        let state = ConversationState::new();
        store.save("u1", "ns", &state, 0).await.unwrap();

        let err = store.save("u1", "ns", &state, 0).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::VersionConflict { expected: 0, actual: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = InMemoryCheckpointStore::new();
        let state = ConversationState::from_messages(vec![Message::user("hi")]);
        store.save("u1", "a", &state, 0).await.unwrap();

        let other = store.load("u1", "b").await.unwrap();
        assert_eq!(other.version, 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_only_one_wins() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let state = ConversationState::from_messages(vec![Message::user("hi")]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let state = state.clone();
                tokio::spawn(async move { store.save("u1", "ns", &state, 0).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        tokio_test::assert_ok!(store.save("u1", "ns", &state, 1).await);
        tokio_test::assert_err!(store.save("u1", "ns", &state, 1).await);
    }
}
