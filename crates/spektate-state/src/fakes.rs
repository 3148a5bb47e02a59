//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryDeploymentStore`, which satisfies the `DeploymentStore`
//! contract without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory deployment table keyed by partition.
///
/// Rows are returned in insertion order. `fail_with` makes every subsequent
/// listing fail, to exercise the "storage unusable" path.
#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    partitions: Mutex<HashMap<String, Vec<StorageRecord>>>,
    failure: Mutex<Option<String>>,
}

impl MemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `records` under their own partition keys.
    pub fn with_records(records: Vec<StorageRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: StorageRecord) {
        let mut partitions = self.partitions.lock().unwrap();
        partitions
            .entry(record.partition_key.clone())
            .or_default()
            .push(record);
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn list_records(&self, partition_key: &str) -> StorageResult<Vec<StorageRecord>> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(StorageError::Request {
                url: format!("memory://{partition_key}"),
                message,
            });
        }
        let partitions = self.partitions.lock().unwrap();
        Ok(partitions.get(partition_key).cloned().unwrap_or_default())
    }
}
