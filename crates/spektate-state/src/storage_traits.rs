//! Storage trait definitions for Spektate
//!
//! The deployment table is written by the pipelines themselves; this crate
//! only reads it. One row correlates the three pipeline stages of a single
//! deployment attempt:
//! - `p1`: source build run id
//! - `p2`: HLD (high-level definition) run id
//! - `p3`: cluster-sync run id
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// StorageRecord
// ---------------------------------------------------------------------------

/// One row of the deployment table. Immutable once read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    #[serde(rename = "PartitionKey", default)]
    pub partition_key: String,
    /// Row key; doubles as the deployment id.
    #[serde(rename = "RowKey", default)]
    pub deployment_id: String,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(rename = "p1", default, deserialize_with = "non_empty")]
    pub source_build_id: Option<String>,
    #[serde(rename = "p2", default, deserialize_with = "non_empty")]
    pub hld_build_id: Option<String>,
    #[serde(rename = "p3", default, deserialize_with = "non_empty")]
    pub cluster_build_id: Option<String>,

    #[serde(rename = "commitId", default, deserialize_with = "non_empty")]
    pub source_commit_id: Option<String>,
    #[serde(rename = "imageTag", default, deserialize_with = "non_empty")]
    pub image_tag: Option<String>,
    #[serde(rename = "hldCommitId", default, deserialize_with = "non_empty")]
    pub hld_commit_id: Option<String>,
    #[serde(rename = "manifestCommitId", default, deserialize_with = "non_empty")]
    pub manifest_commit_id: Option<String>,

    #[serde(default, deserialize_with = "non_empty")]
    pub env: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    pub service: Option<String>,
    /// Pull request id raised against the HLD repository.
    #[serde(default, deserialize_with = "non_empty")]
    pub pr: Option<String>,

    #[serde(rename = "sourceRepo", default, deserialize_with = "non_empty")]
    pub source_repo: Option<String>,
    #[serde(rename = "hldRepo", default, deserialize_with = "non_empty")]
    pub hld_repo: Option<String>,
    #[serde(rename = "manifestRepo", default, deserialize_with = "non_empty")]
    pub manifest_repo: Option<String>,
}

impl StorageRecord {
    /// Create a bare record with the given partition and row key.
    pub fn new(partition_key: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            deployment_id: deployment_id.into(),
            ..Default::default()
        }
    }

    /// True when the record names none of the three pipeline runs.
    pub fn has_no_runs(&self) -> bool {
        self.source_build_id.is_none() && self.hld_build_id.is_none() && self.cluster_build_id.is_none()
    }
}

/// Table entities store ids as strings, but some writers emit numbers.
/// Empty strings and nulls both read as absent.
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// DeploymentFilter
// ---------------------------------------------------------------------------

/// Exact-match filter applied to records before reconciliation.
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFilter {
    pub env: Option<String>,
    pub image_tag: Option<String>,
    pub source_build_id: Option<String>,
    pub commit_id: Option<String>,
    pub service: Option<String>,
    pub deployment_id: Option<String>,
}

impl DeploymentFilter {
    pub fn is_empty(&self) -> bool {
        *self == DeploymentFilter::default()
    }

    pub fn matches(&self, record: &StorageRecord) -> bool {
        fn check(want: &Option<String>, have: Option<&str>) -> bool {
            match want {
                Some(w) => have == Some(w.as_str()),
                None => true,
            }
        }

        check(&self.env, record.env.as_deref())
            && check(&self.image_tag, record.image_tag.as_deref())
            && check(&self.source_build_id, record.source_build_id.as_deref())
            && check(&self.commit_id, record.source_commit_id.as_deref())
            && check(&self.service, record.service.as_deref())
            && check(&self.deployment_id, Some(record.deployment_id.as_str()))
    }

    /// Keep the matching records, preserving their order.
    pub fn apply(&self, records: Vec<StorageRecord>) -> Vec<StorageRecord> {
        if self.is_empty() {
            return records;
        }
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

// ---------------------------------------------------------------------------
// DeploymentStore
// ---------------------------------------------------------------------------

/// Read-only source of deployment correlation records.
///
/// Guarantees:
/// - Records come back in the order the backend returns them.
/// - No method writes to the backend.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// List every record in a partition.
    async fn list_records(&self, partition_key: &str) -> StorageResult<Vec<StorageRecord>>;
}
