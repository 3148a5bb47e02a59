//! Azure DevOps Git host.
//!
//! Endpoints used (all under
//! `https://dev.azure.com/{org}/{project}/_apis/git/repositories/{repo}`):
//! - `commits/{id}`: commit author
//! - `refs?filter=tags/` then `annotatedtags/{objectId}`: sync tags
//! - `pullrequests/{id}`: pull request metadata

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{LookupError, TransportError};
use crate::repository::{
    Author, AuthorResolver, PullRequest, PullRequestResolver, RepoRef, Tag, TagResolver,
};
use crate::transport::{resource_url, Transport};

/// Tag name the cluster sync agent moves after each successful sync.
pub const DEFAULT_SYNC_TAG: &str = "SYNC";

const GIT_API_VERSION: &str = "4.1";
const PR_API_VERSION: &str = "5.1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitUserPayload {
    name: Option<String>,
    email: Option<String>,
    date: Option<DateTime<Utc>>,
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitPayload {
    author: Option<GitUserPayload>,
    remote_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefPayload {
    name: String,
    object_id: String,
}

#[derive(Debug, Deserialize)]
struct RefListPayload {
    #[serde(default)]
    value: Vec<RefPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaggedObjectPayload {
    object_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotatedTagPayload {
    name: Option<String>,
    tagged_object: TaggedObjectPayload,
    tagged_by: Option<GitUserPayload>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeCommitPayload {
    commit_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrRepositoryPayload {
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestPayload {
    pull_request_id: u64,
    title: Option<String>,
    description: Option<String>,
    source_ref_name: Option<String>,
    target_ref_name: Option<String>,
    last_merge_commit: Option<MergeCommitPayload>,
    repository: Option<PrRepositoryPayload>,
}

/// Azure DevOps repository client.
///
/// One instance per access token; the repository is passed per call.
pub struct AzureDevOpsRepo {
    transport: Arc<dyn Transport>,
    access_token: Option<String>,
    sync_tag: String,
}

impl AzureDevOpsRepo {
    pub fn new(transport: Arc<dyn Transport>, access_token: Option<String>) -> Self {
        AzureDevOpsRepo {
            transport,
            access_token: access_token.filter(|t| !t.is_empty()),
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
        }
    }

    /// Use a different sync marker (e.g. `flux-sync`).
    pub fn with_sync_tag(mut self, sync_tag: &str) -> Self {
        self.sync_tag = sync_tag.to_string();
        self
    }

    pub fn sync_tag(&self) -> &str {
        &self.sync_tag
    }

    fn api_base(repo: &RepoRef) -> String {
        format!(
            "https://dev.azure.com/{}/{}/_apis/git/repositories/{}",
            repo.org, repo.project, repo.repo
        )
    }

    /// GET and decode. `Ok(None)` when the host had no data.
    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, FetchError> {
        let response = self
            .transport
            .get(url, self.access_token.as_deref())
            .await
            .map_err(FetchError::Transport)?;
        match response.data {
            None => Ok(None),
            Some(data) => serde_json::from_value(data)
                .map(Some)
                .map_err(|e| FetchError::Malformed(e.to_string())),
        }
    }

    async fn annotated_tag(&self, repo: &RepoRef, r: &RefPayload, name: &str) -> Option<Tag> {
        let base = format!("{}/annotatedtags", Self::api_base(repo));
        let version = format!("{GIT_API_VERSION}-preview.1");
        let url = resource_url(&base, &r.object_id, &[("api-version", version.as_str())]).ok()?;
        match self.fetch::<AnnotatedTagPayload>(&url).await {
            Ok(Some(payload)) => {
                let (tagger, date) = match payload.tagged_by {
                    Some(user) => (user.name, user.date),
                    None => (None, None),
                };
                Some(Tag {
                    name: payload.name.unwrap_or_else(|| name.to_string()),
                    commit: payload.tagged_object.object_id,
                    date,
                    tagger,
                    message: payload.message,
                })
            }
            // Lightweight tag: the ref points straight at the commit.
            Ok(None) => Some(Tag {
                name: name.to_string(),
                commit: r.object_id.clone(),
                date: None,
                tagger: None,
                message: None,
            }),
            Err(e) => {
                warn!(repo = %repo, tag = %name, error = %e, "Failed to expand sync tag");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error(transparent)]
    Transport(TransportError),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Avatar for hosts that do not return one, keyed by the author's email.
fn synthesized_avatar(org: &str, identifier: &str) -> Option<String> {
    let base = format!("https://dev.azure.com/{org}/_api/_common/identityImage");
    reqwest::Url::parse_with_params(&base, &[("id", ""), ("identifier", identifier)])
        .ok()
        .map(String::from)
}

fn strip_heads(branch: Option<String>) -> String {
    branch
        .map(|b| b.trim_start_matches("refs/heads/").to_string())
        .unwrap_or_default()
}

#[async_trait]
impl AuthorResolver for AzureDevOpsRepo {
    async fn resolve_author(&self, repo: &RepoRef, commit_id: &str) -> Option<Author> {
        let base = format!("{}/commits", Self::api_base(repo));
        let url = match resource_url(&base, commit_id, &[("api-version", GIT_API_VERSION)]) {
            Ok(url) => url,
            Err(e) => {
                warn!(repo = %repo, commit = %commit_id, error = %e, "Author lookup failed");
                return None;
            }
        };

        let payload = match self.fetch::<CommitPayload>(&url).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(repo = %repo, commit = %commit_id, "No commit data for author lookup");
                return None;
            }
            Err(e) => {
                warn!(repo = %repo, commit = %commit_id, error = %e, "Author lookup failed");
                return None;
            }
        };

        let author = payload.author?;
        let name = author.name.filter(|n| !n.is_empty())?;
        let image_url = author.image_url.filter(|u| !u.is_empty()).or_else(|| {
            author
                .email
                .as_deref()
                .and_then(|email| synthesized_avatar(&repo.org, email))
        });

        Some(Author {
            name,
            username: author.email,
            url: payload.remote_url,
            image_url,
        })
    }
}

#[async_trait]
impl TagResolver for AzureDevOpsRepo {
    async fn resolve_sync_tags(&self, repo: &RepoRef) -> Vec<Tag> {
        let url = format!(
            "{}/refs?filter=tags/&api-version={}",
            Self::api_base(repo),
            GIT_API_VERSION
        );

        let refs = match self.fetch::<RefListPayload>(&url).await {
            Ok(Some(list)) => list.value,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(repo = %repo, error = %e, "Sync tag lookup failed");
                Vec::new()
            }
        };

        let wanted = format!("refs/tags/{}", self.sync_tag);
        let mut tags = Vec::new();
        for r in refs.iter().filter(|r| r.name == wanted) {
            if let Some(tag) = self.annotated_tag(repo, r, &self.sync_tag).await {
                tags.push(tag);
            }
        }

        debug!(repo = %repo, count = tags.len(), "Resolved sync tags");
        tags
    }
}

#[async_trait]
impl PullRequestResolver for AzureDevOpsRepo {
    async fn resolve_pull_request(
        &self,
        repo: &RepoRef,
        pr_id: &str,
    ) -> Result<PullRequest, LookupError> {
        let base = format!("{}/pullrequests", Self::api_base(repo));
        let url = resource_url(&base, pr_id, &[("api-version", PR_API_VERSION)])
            .map_err(LookupError::Transport)?;

        let payload = match self.fetch::<PullRequestPayload>(&url).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                return Err(LookupError::NotFound {
                    what: "pull request",
                    id: pr_id.to_string(),
                })
            }
            Err(FetchError::Transport(e)) => return Err(LookupError::Transport(e)),
            Err(FetchError::Malformed(message)) => {
                return Err(LookupError::Malformed {
                    what: "pull request",
                    id: pr_id.to_string(),
                    message,
                })
            }
        };

        let merged_by = match &payload.last_merge_commit {
            Some(commit) => self.resolve_author(repo, &commit.commit_id).await,
            None => None,
        };

        let url = match payload.repository.and_then(|r| r.web_url) {
            Some(web_url) => format!("{}/pullrequest/{}", web_url, payload.pull_request_id),
            None => format!(
                "https://dev.azure.com/{}/{}/_git/{}/pullrequest/{}",
                repo.org, repo.project, repo.repo, payload.pull_request_id
            ),
        };

        Ok(PullRequest {
            id: payload.pull_request_id,
            title: payload.title.unwrap_or_default(),
            description: payload.description,
            source_branch: strip_heads(payload.source_ref_name),
            target_branch: strip_heads(payload.target_ref_name),
            merged_by,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base() {
        let repo = RepoRef::new("org", "project", "repo");
        assert_eq!(
            AzureDevOpsRepo::api_base(&repo),
            "https://dev.azure.com/org/project/_apis/git/repositories/repo"
        );
    }

    #[test]
    fn test_synthesized_avatar_encodes_identifier() {
        let url = synthesized_avatar("org", "a+b@example.com").unwrap();
        assert!(url.starts_with("https://dev.azure.com/org/_api/_common/identityImage?"));
        assert!(url.contains("identifier=a%2Bb%40example.com"));
    }

    #[test]
    fn test_strip_heads() {
        assert_eq!(strip_heads(Some("refs/heads/master".to_string())), "master");
        assert_eq!(strip_heads(Some("DEPLOY/x".to_string())), "DEPLOY/x");
        assert_eq!(strip_heads(None), "");
    }
}
