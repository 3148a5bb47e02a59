//! Version-control lookups: commit authors, sync tags and pull requests.
//!
//! Three capabilities, three traits. Authors and tags are advisory and never
//! fail; pull requests are required once asked for and return `LookupError`.

pub mod azure_devops;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LookupError;

pub use azure_devops::AzureDevOpsRepo;

/// Identifies a repository on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub org: String,
    pub project: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(org: &str, project: &str, repo: &str) -> Self {
        RepoRef {
            org: org.to_string(),
            project: project.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Parse a repository web URL.
    ///
    /// Accepts `https://dev.azure.com/{org}/{project}/_git/{repo}` and the
    /// legacy `https://{org}.visualstudio.com/{project}/_git/{repo}` form.
    pub fn from_url(url: &str) -> Option<Self> {
        let rest = url
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let rest = rest.split(['?', '#']).next().unwrap_or(rest);
        let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();

        // Strip user info ("org@dev.azure.com").
        let host = parts.first()?.rsplit('@').next()?;
        let (org, tail) = if host.eq_ignore_ascii_case("dev.azure.com") {
            (*parts.get(1)?, &parts[2..])
        } else if let Some(org) = host.strip_suffix(".visualstudio.com") {
            (org, &parts[1..])
        } else {
            return None;
        };

        match tail {
            [project, "_git", repo, ..] => Some(RepoRef::new(org, project, repo)),
            _ => None,
        }
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.project, self.repo)
    }
}

/// A commit in a specific repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRef {
    pub repo: RepoRef,
    pub commit_id: String,
}

/// A human author. Only `name` is guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    pub username: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

/// An annotated tag and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,
    pub commit: String,
    pub date: Option<DateTime<Utc>>,
    pub tagger: Option<String>,
    pub message: Option<String>,
}

/// Abbreviated commit length; shorter prefixes are too ambiguous to match.
pub const SHORT_COMMIT_LEN: usize = 7;

impl Tag {
    /// Seven-character form of the tagged commit.
    pub fn short_commit(&self) -> &str {
        let end = self
            .commit
            .char_indices()
            .nth(SHORT_COMMIT_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.commit.len());
        &self.commit[..end]
    }

    /// True when `commit` and the tagged commit are the same, allowing
    /// either side to be abbreviated to at least [`SHORT_COMMIT_LEN`].
    pub fn points_at(&self, commit: &str) -> bool {
        let a = self.commit.trim().to_ascii_lowercase();
        let b = commit.trim().to_ascii_lowercase();
        if a.len().min(b.len()) < SHORT_COMMIT_LEN {
            return false;
        }
        a.starts_with(&b) || b.starts_with(&a)
    }
}

/// Pull request metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    /// Absent when the PR has no merge commit or its author did not resolve.
    pub merged_by: Option<Author>,
    pub url: String,
}

/// Human-facing tags page for a repository. Pure; no I/O.
pub fn releases_url(repo: &RepoRef) -> String {
    format!(
        "https://dev.azure.com/{}/{}/_git/{}/tags",
        repo.org, repo.project, repo.repo
    )
}

#[async_trait]
pub trait AuthorResolver: Send + Sync {
    /// Best-effort author lookup; `None` on any failure.
    async fn resolve_author(&self, repo: &RepoRef, commit_id: &str) -> Option<Author>;
}

#[async_trait]
pub trait TagResolver: Send + Sync {
    /// Sync tags in the order the host returned them; empty on any failure.
    async fn resolve_sync_tags(&self, repo: &RepoRef) -> Vec<Tag>;

    fn releases_url(&self, repo: &RepoRef) -> String {
        releases_url(repo)
    }
}

#[async_trait]
pub trait PullRequestResolver: Send + Sync {
    async fn resolve_pull_request(
        &self,
        repo: &RepoRef,
        pr_id: &str,
    ) -> Result<PullRequest, LookupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(commit: &str) -> Tag {
        Tag {
            name: "SYNC".to_string(),
            commit: commit.to_string(),
            date: None,
            tagger: None,
            message: None,
        }
    }

    #[test]
    fn test_releases_url() {
        let repo = RepoRef::new("org", "project", "repo");
        assert_eq!(
            releases_url(&repo),
            "https://dev.azure.com/org/project/_git/repo/tags"
        );
    }

    #[test]
    fn test_repo_ref_from_dev_azure_url() {
        let repo = RepoRef::from_url("https://dev.azure.com/org/project/_git/repo").unwrap();
        assert_eq!(repo, RepoRef::new("org", "project", "repo"));

        let repo =
            RepoRef::from_url("https://org@dev.azure.com/org/my%20proj/_git/hld?path=/").unwrap();
        assert_eq!(repo, RepoRef::new("org", "my%20proj", "hld"));
    }

    #[test]
    fn test_repo_ref_from_visualstudio_url() {
        let repo = RepoRef::from_url("https://contoso.visualstudio.com/web/_git/manifest").unwrap();
        assert_eq!(repo, RepoRef::new("contoso", "web", "manifest"));
    }

    #[test]
    fn test_repo_ref_rejects_other_hosts() {
        assert!(RepoRef::from_url("https://github.com/org/repo").is_none());
        assert!(RepoRef::from_url("https://dev.azure.com/org/project").is_none());
        assert!(RepoRef::from_url("").is_none());
    }

    #[test]
    fn test_tag_points_at_prefix_either_way() {
        let t = tag("ab4c9f1e2d3c4b5a6978");
        assert!(t.points_at("ab4c9f1"));
        assert!(t.points_at("AB4C9F1E2D3C4B5A6978"));
        assert!(!t.points_at("ab4c9f2"));
        assert!(!t.points_at(""));

        assert!(tag("ab4c9f1").points_at("ab4c9f1e2d3c"));
    }

    #[test]
    fn test_tag_points_at_rejects_short_prefixes() {
        let t = tag("ab4c9f1e2d3c4b5a6978");
        assert!(!t.points_at("a"));
        assert!(!t.points_at("ab4c9f"));
        assert!(!tag("ab4c").points_at("ab4c9f1e2d3c"));
    }

    #[test]
    fn test_short_commit() {
        assert_eq!(tag("ab4c9f1e2d3c").short_commit(), "ab4c9f1");
        assert_eq!(tag("abc").short_commit(), "abc");
    }
}
