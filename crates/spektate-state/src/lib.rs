//! Spektate-State: deployment correlation storage
//!
//! This crate reads the table that links the three pipeline stages of a
//! deployment (source build, HLD, cluster sync). It never writes to it;
//! the pipelines populate the table themselves.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `StorageRecord`: one row per deployment attempt
//! - `DeploymentStore`: read-only listing by partition key
//! - `AzureTableStore`: Azure Table Storage backend
//! - `DeploymentFilter`: exact-match record filtering

pub mod azure_table;
mod error;
pub mod fakes;
pub mod storage_traits;

pub use azure_table::{AzureTableConfig, AzureTableStore};
pub use error::StorageError;
pub use storage_traits::{DeploymentFilter, DeploymentStore, StorageRecord, StorageResult};
