//! MongoDB AuditStore implementation.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ReplaceOptions;
use mongodb::{Client, Collection, IndexModel};

use crate::audit::AuditLog;
use crate::storage::{AuditStore, Result};

/// Default collection name for audit records.
pub const AUDIT_COLLECTION: &str = "audit_logs";

/// MongoDB implementation of AuditStore.
pub struct MongoAuditStore {
    audit_logs: Collection<AuditLog>,
}

impl MongoAuditStore {
    /// Create a new MongoDB audit store and ensure its indexes.
    pub async fn new(client: &Client, database_name: &str, collection_name: &str) -> Result<Self> {
        let database = client.database(database_name);
        let audit_logs = database.collection::<AuditLog>(collection_name);

        let store = Self { audit_logs };
        store.init().await?;

        Ok(store)
    }

    /// Initialize indexes for entity history and event-type queries.
    async fn init(&self) -> Result<()> {
        let entity_index = IndexModel::builder()
            .keys(doc! { "entityType": 1, "entityId": 1, "timestamp": -1 })
            .build();

        self.audit_logs.create_index(entity_index).await?;

        let event_type_index = IndexModel::builder()
            .keys(doc! { "eventType": 1, "timestamp": -1 })
            .build();

        self.audit_logs.create_index(event_type_index).await?;

        Ok(())
    }
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    async fn upsert(&self, record: &AuditLog) -> Result<()> {
        let filter = doc! { "_id": record.id.as_str() };
        let options = ReplaceOptions::builder().upsert(true).build();

        self.audit_logs
            .replace_one(filter, record)
            .with_options(options)
            .await?;

        Ok(())
    }
}
