//! Pipeline stage clients.
//!
//! Each CI backend gets an adapter behind [`PipelineStageClient`]. Adapters
//! normalize the backend's status vocabulary into [`PipelineStatus`].

pub mod azure_devops;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineFetchError;
use crate::repository::RepoRef;

pub use azure_devops::{AzureBuildPipeline, AzurePipelineConfig, AzureReleasePipeline};

/// The three stages of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Source build: code to container image.
    Source,
    /// Image tag to high-level definition.
    Hld,
    /// HLD to cluster manifest, then cluster sync.
    Cluster,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Source, Stage::Hld, Stage::Cluster];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Hld => "hld",
            Stage::Cluster => "cluster",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" | "src" => Ok(Stage::Source),
            "hld" => Ok(Stage::Hld),
            "cluster" | "manifest" => Ok(Stage::Cluster),
            other => Err(format!("unknown stage '{other}' (expected source, hld or cluster)")),
        }
    }
}

/// Normalized run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::NotStarted => "not-started",
            PipelineStatus::InProgress => "in-progress",
            PipelineStatus::Succeeded => "succeeded",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Succeeded | PipelineStatus::Failed | PipelineStatus::Canceled
        )
    }

    /// Status of a run the backend has not finished.
    ///
    /// A started run is in progress. An unstarted run is not-started only while
    /// it has been queued for less than `queue_window`; after that it counts as
    /// in progress.
    pub fn pending(
        start_time: Option<DateTime<Utc>>,
        queue_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        queue_window: Duration,
    ) -> Self {
        if start_time.is_some() {
            return PipelineStatus::InProgress;
        }
        match queue_time {
            Some(queued) if now - queued >= queue_window => PipelineStatus::InProgress,
            _ => PipelineStatus::NotStarted,
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage run, as a snapshot taken at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub id: String,
    pub build_number: Option<String>,
    pub definition_name: Option<String>,
    pub status: PipelineStatus,
    pub queue_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    /// Present only when `status` is terminal.
    pub end_time: Option<DateTime<Utc>>,
    pub source_commit: Option<String>,
    pub source_branch: Option<String>,
    pub repository: Option<RepoRef>,
    pub result_url: Option<String>,
}

impl PipelineRun {
    pub fn new(id: &str, status: PipelineStatus) -> Self {
        PipelineRun {
            id: id.to_string(),
            build_number: None,
            definition_name: None,
            status,
            queue_time: None,
            start_time: None,
            end_time: None,
            source_commit: None,
            source_branch: None,
            repository: None,
            result_url: None,
        }
    }

    pub fn with_times(
        mut self,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self.enforce_end_time();
        self
    }

    pub fn with_commit(mut self, commit: &str) -> Self {
        self.source_commit = Some(commit.to_string());
        self
    }

    pub fn with_repository(mut self, repo: RepoRef) -> Self {
        self.repository = Some(repo);
        self
    }

    /// When the run began, falling back to when it was queued.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_time.or(self.queue_time)
    }

    /// Drop an end time the backend reported for a non-terminal run.
    pub(crate) fn enforce_end_time(&mut self) {
        if !self.status.is_terminal() {
            self.end_time = None;
        }
    }
}

/// Capability set shared by every CI backend.
#[async_trait]
pub trait PipelineStageClient: Send + Sync {
    /// Fetch one run. `Ok(None)` when the backend has no such run.
    async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, PipelineFetchError>;

    /// Recent runs, most recent first, optionally bounded below by `since`.
    async fn get_runs(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PipelineRun>, PipelineFetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 17, 18, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PipelineStatus::Succeeded.is_terminal());
        assert!(PipelineStatus::Failed.is_terminal());
        assert!(PipelineStatus::Canceled.is_terminal());
        assert!(!PipelineStatus::InProgress.is_terminal());
        assert!(!PipelineStatus::NotStarted.is_terminal());
    }

    #[test]
    fn test_pending_started_is_in_progress() {
        let status = PipelineStatus::pending(Some(at(0)), Some(at(0)), at(1), Duration::minutes(30));
        assert_eq!(status, PipelineStatus::InProgress);
    }

    #[test]
    fn test_pending_queued_within_window_is_not_started() {
        let status = PipelineStatus::pending(None, Some(at(0)), at(10), Duration::minutes(30));
        assert_eq!(status, PipelineStatus::NotStarted);
    }

    #[test]
    fn test_pending_queued_past_window_is_in_progress() {
        let status = PipelineStatus::pending(None, Some(at(0)), at(45), Duration::minutes(30));
        assert_eq!(status, PipelineStatus::InProgress);
    }

    #[test]
    fn test_end_time_dropped_for_running_run() {
        let run = PipelineRun::new("1", PipelineStatus::InProgress).with_times(Some(at(0)), Some(at(5)));
        assert_eq!(run.end_time, None);

        let run = PipelineRun::new("1", PipelineStatus::Failed).with_times(Some(at(0)), Some(at(5)));
        assert_eq!(run.end_time, Some(at(5)));
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("source".parse::<Stage>().unwrap(), Stage::Source);
        assert_eq!("HLD".parse::<Stage>().unwrap(), Stage::Hld);
        assert_eq!("manifest".parse::<Stage>().unwrap(), Stage::Cluster);
        assert!("deploy".parse::<Stage>().is_err());
    }
}
