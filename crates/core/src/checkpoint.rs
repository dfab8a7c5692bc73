//! Resume checkpoints and the store they are read from.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::bus::lock;

/// How far a learner got in an earlier session.
///
/// `phase_index` is stored as written by whatever saved it and may be out of
/// range; the resume resolver clamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCheckpoint {
    pub phase_index: i64,
    pub saved_at: DateTime<Utc>,
}

/// Read path to persisted checkpoints.
///
/// The core only ever reads; writing checkpoints is the job of whatever owns
/// the store.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_checkpoint(&self, session_id: Uuid) -> Result<Option<ResumeCheckpoint>>;
}

/// A `CheckpointStore` backed by a map, for tests and offline tools.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<Uuid, ResumeCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: Uuid, checkpoint: ResumeCheckpoint) {
        lock(&self.checkpoints).insert(session_id, checkpoint);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load_checkpoint(&self, session_id: Uuid) -> Result<Option<ResumeCheckpoint>> {
        Ok(lock(&self.checkpoints).get(&session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryCheckpointStore::new();
        let id = Uuid::new_v4();
        assert!(store.load_checkpoint(id).await.unwrap().is_none());

        let checkpoint = ResumeCheckpoint {
            phase_index: 2,
            saved_at: Utc::now(),
        };
        store.insert(id, checkpoint.clone());
        assert_eq!(store.load_checkpoint(id).await.unwrap(), Some(checkpoint));
        assert!(store.load_checkpoint(Uuid::new_v4()).await.unwrap().is_none());
    }
}
