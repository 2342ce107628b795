//! Mock audit store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AuditStore, Result, StorageError};
use crate::audit::AuditLog;

/// Mock audit store that keeps records in memory, keyed by id.
#[derive(Default)]
pub struct MockAuditStore {
    records: RwLock<HashMap<String, AuditLog>>,
    writes: AtomicUsize,
    fail_on_upsert: RwLock<bool>,
    upsert_delay: RwLock<Option<Duration>>,
}

impl MockAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_upsert(&self, fail: bool) {
        *self.fail_on_upsert.write().await = fail;
    }

    /// Make every upsert sleep before completing, simulating a slow backend.
    pub async fn set_upsert_delay(&self, delay: Option<Duration>) {
        *self.upsert_delay.write().await = delay;
    }

    /// Number of distinct records stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Number of successful upsert calls, including replacements.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn get(&self, id: &str) -> Option<AuditLog> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn records(&self) -> Vec<AuditLog> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl AuditStore for MockAuditStore {
    async fn upsert(&self, record: &AuditLog) -> Result<()> {
        let delay = *self.upsert_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_on_upsert.read().await {
            return Err(StorageError::Unavailable(
                "Mock upsert failure".to_string(),
            ));
        }

        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
