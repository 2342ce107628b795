//! Storage configuration types.

use serde::Deserialize;

use super::ConfigError;
use crate::storage::mongodb::AUDIT_COLLECTION;

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// MongoDB-specific configuration.
    pub mongodb: MongodbConfig,
}

impl StorageConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.mongodb.database.trim().is_empty() || self.mongodb.audit_collection.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "storage.mongodb.database and audit_collection must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// MongoDB-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongodbConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Collection holding audit records.
    pub audit_collection: String,
}

impl Default for MongodbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "workforce".to_string(),
            audit_collection: AUDIT_COLLECTION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let storage = StorageConfig::default();
        assert_eq!(storage.mongodb.uri, "mongodb://localhost:27017");
        assert_eq!(storage.mongodb.database, "workforce");
        assert_eq!(storage.mongodb.audit_collection, "audit_logs");
    }

    #[test]
    fn test_validate_rejects_empty_collection() {
        let mut storage = StorageConfig::default();
        storage.mongodb.audit_collection = String::new();
        assert!(storage.validate().is_err());
    }
}
