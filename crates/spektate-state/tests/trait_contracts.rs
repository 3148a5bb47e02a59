//! Contract tests for DeploymentStore.
//!
//! These tests verify the behavioral contract of the storage trait using the
//! in-memory fake. Any conforming implementation must pass these.

use spektate_state::fakes::MemoryDeploymentStore;
use spektate_state::storage_traits::*;
use spektate_state::StorageError;

fn record(partition: &str, id: &str) -> StorageRecord {
    let mut r = StorageRecord::new(partition, id);
    r.source_build_id = Some(format!("{id}-src"));
    r
}

#[tokio::test]
async fn list_preserves_insertion_order() {
    let store = MemoryDeploymentStore::with_records(vec![
        record("p", "c"),
        record("p", "a"),
        record("p", "b"),
    ]);

    let ids: Vec<String> = store
        .list_records("p")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.deployment_id)
        .collect();

    assert_eq!(ids, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn list_is_scoped_to_partition() {
    let store = MemoryDeploymentStore::with_records(vec![record("p1", "x"), record("p2", "y")]);

    let rows = store.list_records("p2").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].deployment_id, "y");
}

#[tokio::test]
async fn list_unknown_partition_is_empty_not_error() {
    let store = MemoryDeploymentStore::new();
    assert!(store.list_records("missing").await.unwrap().is_empty());
}

#[tokio::test]
async fn list_is_read_only() {
    let store = MemoryDeploymentStore::with_records(vec![record("p", "a")]);
    let first = store.list_records("p").await.unwrap();
    let second = store.list_records("p").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn unusable_store_surfaces_error() {
    let store = MemoryDeploymentStore::with_records(vec![record("p", "a")]);
    store.fail_with("account key rejected");

    let err = store.list_records("p").await.unwrap_err();
    assert!(matches!(err, StorageError::Request { .. }));
}

#[tokio::test]
async fn filter_then_list_keeps_relative_order() {
    let mut a = record("p", "a");
    a.service = Some("frontend".to_string());
    let b = record("p", "b");
    let mut c = record("p", "c");
    c.service = Some("frontend".to_string());
    let store = MemoryDeploymentStore::with_records(vec![a, b, c]);

    let filter = DeploymentFilter {
        service: Some("frontend".to_string()),
        ..Default::default()
    };
    let kept = filter.apply(store.list_records("p").await.unwrap());
    let ids: Vec<&str> = kept.iter().map(|r| r.deployment_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
}
