//! Concurrent author resolution over a batch of deployments.

use std::sync::Arc;

use spektate_core::fakes::FakeRepo;
use spektate_core::{resolve_authors, Author, CommitRef, Deployment, RepoRef, StorageRecord};
use tracing_test::traced_test;

fn author(name: &str) -> Author {
    Author {
        name: name.to_string(),
        username: Some(format!("{}@example.com", name.to_lowercase())),
        url: None,
        image_url: None,
    }
}

fn deployment(id: &str, commit: Option<&str>) -> Deployment {
    let mut d = Deployment::new(StorageRecord::new("org.project", id));
    d.author_commit = commit.map(|c| CommitRef {
        repo: RepoRef::new("org", "project", "app"),
        commit_id: c.to_string(),
    });
    d
}

#[tokio::test]
async fn test_partial_failures_leave_others_resolved() {
    let repo = Arc::new(
        FakeRepo::new()
            .with_author("c1", author("Ada"))
            .with_author("c3", author("Grace"))
            .with_author("c5", author("Linus")),
    );
    let deployments = (1..=5)
        .map(|i| deployment(&format!("d{i}"), Some(format!("c{i}").as_str())))
        .collect();

    let resolved = resolve_authors(deployments, repo.clone()).await;

    assert_eq!(resolved.len(), 5);
    let names: Vec<Option<&str>> = resolved
        .iter()
        .map(|r| r.author.as_ref().map(|a| a.name.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![Some("Ada"), None, Some("Grace"), None, Some("Linus")]
    );
    assert_eq!(resolved.iter().filter(|r| r.author.is_some()).count(), 3);
}

#[tokio::test]
async fn test_one_lookup_per_deployment() {
    let repo = Arc::new(FakeRepo::new().with_author("c1", author("Ada")));
    let deployments = vec![
        deployment("d1", Some("c1")),
        deployment("d2", Some("c1")),
        deployment("d3", None),
    ];

    let resolved = resolve_authors(deployments, repo.clone()).await;

    assert_eq!(resolved.len(), 3);
    assert_eq!(repo.author_calls(), 2);
    assert!(resolved[2].author.is_none());
}

#[tokio::test]
async fn test_panicking_lookup_is_isolated() {
    let repo = Arc::new(
        FakeRepo::new()
            .with_author("c1", author("Ada"))
            .with_author("c3", author("Grace"))
            .panicking_on("c2"),
    );
    let deployments = vec![
        deployment("d1", Some("c1")),
        deployment("d2", Some("c2")),
        deployment("d3", Some("c3")),
    ];

    let resolved = resolve_authors(deployments, repo).await;

    let ids: Vec<&str> = resolved.iter().map(|r| r.deployment.deployment_id()).collect();
    assert_eq!(ids, vec!["d1", "d2", "d3"]);
    assert_eq!(resolved[0].author.as_ref().unwrap().name, "Ada");
    assert!(resolved[1].author.is_none());
    assert_eq!(resolved[2].author.as_ref().unwrap().name, "Grace");
}

#[tokio::test]
async fn test_empty_batch() {
    let resolved = resolve_authors(Vec::new(), Arc::new(FakeRepo::new())).await;
    assert!(resolved.is_empty());
}

#[traced_test]
#[tokio::test]
async fn test_failed_lookups_are_logged() {
    let repo = Arc::new(FakeRepo::new().with_author("c1", author("Ada")));
    let deployments = vec![deployment("d1", Some("c1")), deployment("d2", Some("c2"))];

    resolve_authors(deployments, repo).await;

    assert!(logs_contain("author.lookup_failed"));
    assert!(logs_contain("authors.resolved"));
}
