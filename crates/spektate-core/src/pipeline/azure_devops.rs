//! Azure DevOps pipeline adapters.
//!
//! Source and cluster stages run as build pipelines (`_apis/build/builds`);
//! the HLD stage may run as a classic release (`vsrm.../_apis/release/releases`).
//! Both normalize into [`PipelineRun`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::PipelineFetchError;
use crate::pipeline::{PipelineRun, PipelineStageClient, PipelineStatus};
use crate::repository::RepoRef;
use crate::transport::{resource_url, Transport};

const BUILD_API_VERSION: &str = "5.0";
const RELEASE_API_VERSION: &str = "5.1";

/// Default time an unstarted run may sit in the queue and still count as
/// not-started.
pub const DEFAULT_QUEUE_WINDOW_MINS: i64 = 30;

/// Connection settings shared by the Azure DevOps adapters.
#[derive(Debug, Clone)]
pub struct AzurePipelineConfig {
    pub org: String,
    pub project: String,
    pub access_token: Option<String>,
    pub queue_window: Duration,
}

impl AzurePipelineConfig {
    pub fn new(org: &str, project: &str) -> Self {
        AzurePipelineConfig {
            org: org.to_string(),
            project: project.to_string(),
            access_token: None,
            queue_window: Duration::minutes(DEFAULT_QUEUE_WINDOW_MINS),
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        if !token.is_empty() {
            self.access_token = Some(token.to_string());
        }
        self
    }

    pub fn with_queue_window(mut self, window: Duration) -> Self {
        self.queue_window = window;
        self
    }
}

fn run_url(base: &str, run_id: &str, api_version: &str) -> Result<String, PipelineFetchError> {
    resource_url(base, run_id, &[("api-version", api_version)]).map_err(|source| {
        PipelineFetchError::Transport {
            run_id: run_id.to_string(),
            source,
        }
    })
}

async fn fetch<T: DeserializeOwned>(
    transport: &dyn Transport,
    config: &AzurePipelineConfig,
    url: &str,
    run_id: &str,
) -> Result<Option<T>, PipelineFetchError> {
    let response = transport
        .get(url, config.access_token.as_deref())
        .await
        .map_err(|source| PipelineFetchError::Transport {
            run_id: run_id.to_string(),
            source,
        })?;
    match response.data {
        None => Ok(None),
        Some(data) => serde_json::from_value(data)
            .map(Some)
            .map_err(|e| PipelineFetchError::Malformed {
                run_id: run_id.to_string(),
                message: e.to_string(),
            }),
    }
}

#[derive(Debug, Deserialize)]
struct ListPayload<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WebLink {
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinksPayload {
    web: Option<WebLink>,
}

#[derive(Debug, Deserialize)]
struct NamedPayload {
    name: Option<String>,
}

/// Accepts numeric or string ids.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRepositoryPayload {
    id: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildPayload {
    id: Value,
    build_number: Option<String>,
    status: Option<String>,
    result: Option<String>,
    queue_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    source_version: Option<String>,
    source_branch: Option<String>,
    repository: Option<BuildRepositoryPayload>,
    definition: Option<NamedPayload>,
    #[serde(rename = "_links")]
    links: Option<LinksPayload>,
}

/// Map a build's `status`/`result` pair.
///
/// `result` is authoritative once present: `partiallySucceeded` counts as
/// success, `canceled`/`abandoned` as canceled, anything else as failed.
pub(crate) fn classify_build(
    status: Option<&str>,
    result: Option<&str>,
    start_time: Option<DateTime<Utc>>,
    queue_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    queue_window: Duration,
) -> PipelineStatus {
    let result = result.filter(|r| !r.eq_ignore_ascii_case("none"));
    let completed = status.is_some_and(|s| s.eq_ignore_ascii_case("completed"));

    match result {
        Some(r) if completed || r.eq_ignore_ascii_case("canceled") => {
            match r.to_ascii_lowercase().as_str() {
                "succeeded" | "partiallysucceeded" => PipelineStatus::Succeeded,
                "canceled" | "abandoned" => PipelineStatus::Canceled,
                _ => PipelineStatus::Failed,
            }
        }
        _ if completed => PipelineStatus::Failed,
        _ => PipelineStatus::pending(start_time, queue_time, now, queue_window),
    }
}

impl BuildPayload {
    fn into_run(self, config: &AzurePipelineConfig, now: DateTime<Utc>) -> PipelineRun {
        let status = classify_build(
            self.status.as_deref(),
            self.result.as_deref(),
            self.start_time,
            self.queue_time,
            now,
            config.queue_window,
        );

        // Only Azure Repos can be queried through the git API.
        let repository = self.repository.and_then(|r| {
            let hosted = r
                .kind
                .as_deref()
                .map_or(true, |k| k.eq_ignore_ascii_case("TfsGit"));
            if !hosted {
                return None;
            }
            r.name
                .or(r.id)
                .map(|repo| RepoRef::new(&config.org, &config.project, &repo))
        });

        let mut run = PipelineRun {
            id: id_string(&self.id),
            build_number: self.build_number,
            definition_name: self.definition.and_then(|d| d.name),
            status,
            queue_time: self.queue_time,
            start_time: self.start_time,
            end_time: self.finish_time,
            source_commit: self.source_version,
            source_branch: self.source_branch,
            repository,
            result_url: self.links.and_then(|l| l.web).and_then(|w| w.href),
        };
        run.enforce_end_time();
        run
    }
}

/// Build pipeline adapter.
pub struct AzureBuildPipeline {
    config: AzurePipelineConfig,
    transport: Arc<dyn Transport>,
}

impl AzureBuildPipeline {
    pub fn new(config: AzurePipelineConfig, transport: Arc<dyn Transport>) -> Self {
        AzureBuildPipeline { config, transport }
    }

    fn builds_url(&self) -> String {
        format!(
            "https://dev.azure.com/{}/{}/_apis/build/builds",
            self.config.org, self.config.project
        )
    }
}

#[async_trait]
impl PipelineStageClient for AzureBuildPipeline {
    async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, PipelineFetchError> {
        let url = run_url(&self.builds_url(), run_id, BUILD_API_VERSION)?;
        let payload: Option<BuildPayload> =
            fetch(self.transport.as_ref(), &self.config, &url, run_id).await?;
        Ok(payload.map(|p| p.into_run(&self.config, Utc::now())))
    }

    async fn get_runs(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PipelineRun>, PipelineFetchError> {
        let mut url = format!(
            "{}?api-version={}&queryOrder=queueTimeDescending",
            self.builds_url(),
            BUILD_API_VERSION
        );
        if let Some(since) = since {
            url.push_str("&minTime=");
            url.push_str(&since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        let payload: Option<ListPayload<BuildPayload>> =
            fetch(self.transport.as_ref(), &self.config, &url, "*").await?;
        let now = Utc::now();
        let mut runs: Vec<PipelineRun> = payload
            .map(|p| p.value)
            .unwrap_or_default()
            .into_iter()
            .map(|b| b.into_run(&self.config, now))
            .collect();
        sort_recent_first(&mut runs);
        debug!(count = runs.len(), "Listed builds");
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Releases
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseEnvironmentPayload {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleasePayload {
    id: Value,
    name: Option<String>,
    status: Option<String>,
    created_on: Option<DateTime<Utc>>,
    modified_on: Option<DateTime<Utc>>,
    release_definition: Option<NamedPayload>,
    #[serde(default)]
    environments: Vec<ReleaseEnvironmentPayload>,
    #[serde(default)]
    artifacts: Vec<Value>,
    #[serde(rename = "_links")]
    links: Option<LinksPayload>,
}

/// Map a release's own status plus its environments' statuses.
pub(crate) fn classify_release(
    status: Option<&str>,
    environments: &[Option<&str>],
    created_on: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    queue_window: Duration,
) -> PipelineStatus {
    if status.is_some_and(|s| s.eq_ignore_ascii_case("abandoned")) {
        return PipelineStatus::Canceled;
    }

    let envs: Vec<String> = environments
        .iter()
        .map(|s| s.unwrap_or("undefined").to_ascii_lowercase())
        .collect();
    let any = |wanted: &[&str]| envs.iter().any(|e| wanted.contains(&e.as_str()));

    if any(&["rejected"]) {
        return PipelineStatus::Failed;
    }
    if any(&["canceled"]) {
        return PipelineStatus::Canceled;
    }
    if !envs.is_empty()
        && envs
            .iter()
            .all(|e| e == "succeeded" || e == "partiallysucceeded")
    {
        return PipelineStatus::Succeeded;
    }
    if any(&["inprogress"]) {
        return PipelineStatus::InProgress;
    }
    PipelineStatus::pending(None, created_on, now, queue_window)
}

impl ReleasePayload {
    fn into_run(self, config: &AzurePipelineConfig, now: DateTime<Utc>) -> PipelineRun {
        let env_statuses: Vec<Option<&str>> = self
            .environments
            .iter()
            .map(|e| e.status.as_deref())
            .collect();
        let status = classify_release(
            self.status.as_deref(),
            &env_statuses,
            self.created_on,
            now,
            config.queue_window,
        );

        let artifact = self.artifacts.first();
        let source_commit = artifact
            .and_then(|a| a.pointer("/definitionReference/sourceVersion/id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let source_branch = artifact
            .and_then(|a| a.pointer("/definitionReference/branch/name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let repository = artifact
            .and_then(|a| a.pointer("/definitionReference/repository/name"))
            .and_then(Value::as_str)
            .map(|repo| RepoRef::new(&config.org, &config.project, repo));

        let mut run = PipelineRun {
            id: id_string(&self.id),
            build_number: self.name,
            definition_name: self.release_definition.and_then(|d| d.name),
            status,
            queue_time: self.created_on,
            start_time: self.created_on,
            end_time: self.modified_on,
            source_commit,
            source_branch,
            repository,
            result_url: self.links.and_then(|l| l.web).and_then(|w| w.href),
        };
        run.enforce_end_time();
        run
    }
}

/// Classic release adapter.
pub struct AzureReleasePipeline {
    config: AzurePipelineConfig,
    transport: Arc<dyn Transport>,
}

impl AzureReleasePipeline {
    pub fn new(config: AzurePipelineConfig, transport: Arc<dyn Transport>) -> Self {
        AzureReleasePipeline { config, transport }
    }

    fn releases_url(&self) -> String {
        format!(
            "https://vsrm.dev.azure.com/{}/{}/_apis/release/releases",
            self.config.org, self.config.project
        )
    }
}

#[async_trait]
impl PipelineStageClient for AzureReleasePipeline {
    async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, PipelineFetchError> {
        let url = run_url(&self.releases_url(), run_id, RELEASE_API_VERSION)?;
        let payload: Option<ReleasePayload> =
            fetch(self.transport.as_ref(), &self.config, &url, run_id).await?;
        Ok(payload.map(|p| p.into_run(&self.config, Utc::now())))
    }

    async fn get_runs(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PipelineRun>, PipelineFetchError> {
        let mut url = format!(
            "{}?api-version={}&$expand=environments,artifacts&queryOrder=descending",
            self.releases_url(),
            RELEASE_API_VERSION
        );
        if let Some(since) = since {
            url.push_str("&minCreatedTime=");
            url.push_str(&since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        let payload: Option<ListPayload<ReleasePayload>> =
            fetch(self.transport.as_ref(), &self.config, &url, "*").await?;
        let now = Utc::now();
        let mut runs: Vec<PipelineRun> = payload
            .map(|p| p.value)
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.into_run(&self.config, now))
            .collect();
        sort_recent_first(&mut runs);
        debug!(count = runs.len(), "Listed releases");
        Ok(runs)
    }
}

/// Most recently queued first; runs without times keep their relative order
/// at the end.
fn sort_recent_first(runs: &mut [PipelineRun]) {
    runs.sort_by(|a, b| {
        let a = a.queue_time.or(a.start_time);
        let b = b.queue_time.or(b.start_time);
        match (a, b) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
}
