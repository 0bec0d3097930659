// ABOUTME: Sandbox registry holding one status record per sandbox id
// ABOUTME: Narrow store trait plus the in-memory implementation shared by handlers and the orchestrator

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::SandboxRecord;

/// Mutation applied to a single record while the store holds its lock
pub type RecordUpdate = Box<dyn FnOnce(&mut SandboxRecord) + Send>;

/// Store of sandbox records, the single source of truth for status polling
#[async_trait]
pub trait SandboxStore: Send + Sync {
    /// Get a copy of the record for `id`
    async fn get(&self, id: &str) -> Option<SandboxRecord>;

    /// Insert or replace a record
    async fn set(&self, record: SandboxRecord);

    /// Insert only if no record exists for the id; returns false on a reused id
    async fn insert_new(&self, record: SandboxRecord) -> bool;

    /// Remove a record, returning it if it existed
    async fn delete(&self, id: &str) -> Option<SandboxRecord>;

    /// Apply `apply` to the record atomically and return the updated copy
    async fn update(&self, id: &str, apply: RecordUpdate) -> Option<SandboxRecord>;

    /// Snapshot of every record
    async fn list(&self) -> Vec<SandboxRecord>;
}

/// In-process registry backed by a locked map
#[derive(Debug, Clone, Default)]
pub struct InMemorySandboxStore {
    entries: Arc<RwLock<HashMap<String, SandboxRecord>>>,
}

impl InMemorySandboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SandboxStore for InMemorySandboxStore {
    async fn get(&self, id: &str) -> Option<SandboxRecord> {
        let entries = self.entries.read().await;
        entries.get(id).cloned()
    }

    async fn set(&self, record: SandboxRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(record.id.clone(), record);
    }

    async fn insert_new(&self, record: SandboxRecord) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&record.id) {
            return false;
        }
        entries.insert(record.id.clone(), record);
        true
    }

    async fn delete(&self, id: &str) -> Option<SandboxRecord> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(id);
        if removed.is_some() {
            debug!("Evicted sandbox record {}", id);
        }
        removed
    }

    async fn update(&self, id: &str, apply: RecordUpdate) -> Option<SandboxRecord> {
        let mut entries = self.entries.write().await;
        let record = entries.get_mut(id)?;
        apply(record);
        record.updated_at = Utc::now();
        Some(record.clone())
    }

    async fn list(&self) -> Vec<SandboxRecord> {
        let entries = self.entries.read().await;
        entries.values().cloned().collect()
    }
}
