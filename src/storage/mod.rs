//! Audit log persistence.
//!
//! The store exposes a single idempotent operation: upsert-by-id. Records are
//! keyed by a content-derived id, so writing the same record any number of
//! times leaves exactly one document behind. There is no read-before-write
//! and no locking; the backend's native upsert is the only concurrency guard.

use async_trait::async_trait;
use tracing::info;

use crate::audit::AuditLog;
use crate::config::StorageConfig;

pub mod mock;
pub mod mongodb;

pub use self::mongodb::MongoAuditStore;
pub use mock::MockAuditStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] ::mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Write target for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert the record if its id is absent, otherwise replace it in place.
    async fn upsert(&self, record: &AuditLog) -> Result<()>;
}

/// Connect to MongoDB and prepare the audit collection.
pub async fn init_audit_store(config: &StorageConfig) -> Result<MongoAuditStore> {
    let mongodb = &config.mongodb;
    let client = ::mongodb::Client::with_uri_str(&mongodb.uri).await?;
    let store =
        MongoAuditStore::new(&client, &mongodb.database, &mongodb.audit_collection).await?;

    info!(
        database = %mongodb.database,
        collection = %mongodb.audit_collection,
        "Audit store ready"
    );

    Ok(store)
}
