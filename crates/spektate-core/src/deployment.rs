//! The deployment aggregate.
//!
//! A [`Deployment`] is built once by the reconciler and never mutated. Its
//! derived fields (status, duration, end time) are recomputed from the stage
//! runs on every call. Author lookup is a second phase: it consumes the
//! deployment and yields a [`ResolvedDeployment`], which has no way to look
//! the author up again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spektate_state::StorageRecord;
use tracing::debug;

use crate::pipeline::{PipelineRun, PipelineStatus, Stage};
use crate::repository::{Author, AuthorResolver, CommitRef, PullRequest, Tag};

/// Rolled-up status of all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
    InProgress,
    Canceled,
    Unknown,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Succeeded => "succeeded",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::InProgress => "in-progress",
            DeploymentStatus::Canceled => "canceled",
            DeploymentStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage whose run could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFetchFailure {
    pub stage: Stage,
    pub run_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub record: StorageRecord,
    pub source: Option<PipelineRun>,
    pub hld: Option<PipelineRun>,
    pub cluster: Option<PipelineRun>,
    pub pull_request: Option<PullRequest>,
    /// Sync tag pointing at the manifest commit; confirms the cluster converged.
    pub sync_tag: Option<Tag>,
    /// Commit whose author is attributed to this deployment.
    pub author_commit: Option<CommitRef>,
    #[serde(default)]
    pub fetch_errors: Vec<StageFetchFailure>,
}

impl Deployment {
    /// A deployment with no resolved data beyond its record.
    pub fn new(record: StorageRecord) -> Self {
        Deployment {
            record,
            source: None,
            hld: None,
            cluster: None,
            pull_request: None,
            sync_tag: None,
            author_commit: None,
            fetch_errors: Vec::new(),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.record.deployment_id
    }

    pub fn stage(&self, stage: Stage) -> Option<&PipelineRun> {
        match stage {
            Stage::Source => self.source.as_ref(),
            Stage::Hld => self.hld.as_ref(),
            Stage::Cluster => self.cluster.as_ref(),
        }
    }

    pub(crate) fn set_stage(&mut self, stage: Stage, run: Option<PipelineRun>) {
        match stage {
            Stage::Source => self.source = run,
            Stage::Hld => self.hld = run,
            Stage::Cluster => self.cluster = run,
        }
    }

    /// Resolved stages in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = (Stage, &PipelineRun)> {
        Stage::ALL
            .into_iter()
            .filter_map(move |s| self.stage(s).map(|run| (s, run)))
    }

    pub fn is_cluster_synced(&self) -> bool {
        self.sync_tag.is_some()
    }

    /// Sync-tag evidence only stands in for a cluster run that has not
    /// reached a terminal state.
    fn tag_overrides(&self, stage: Stage, run: &PipelineRun) -> bool {
        stage == Stage::Cluster && self.is_cluster_synced() && !run.status.is_terminal()
    }

    /// A stage's status, with sync-tag evidence overriding an unfinished
    /// cluster run.
    pub fn stage_status(&self, stage: Stage) -> Option<PipelineStatus> {
        let run = self.stage(stage)?;
        if self.tag_overrides(stage, run) {
            return Some(PipelineStatus::Succeeded);
        }
        Some(run.status)
    }

    fn stage_end(&self, stage: Stage, run: &PipelineRun) -> Option<DateTime<Utc>> {
        if self.tag_overrides(stage, run) {
            return run.end_time.or_else(|| self.sync_tag.as_ref().and_then(|t| t.date));
        }
        run.end_time
    }

    /// Failure dominates, then anything still running, then success.
    pub fn status(&self) -> DeploymentStatus {
        let statuses: Vec<PipelineStatus> = Stage::ALL
            .into_iter()
            .filter_map(|s| self.stage_status(s))
            .collect();

        if statuses.is_empty() {
            DeploymentStatus::Unknown
        } else if statuses.contains(&PipelineStatus::Failed) {
            DeploymentStatus::Failed
        } else if statuses.iter().any(|s| !s.is_terminal()) {
            DeploymentStatus::InProgress
        } else if statuses.iter().all(|s| *s == PipelineStatus::Succeeded) {
            DeploymentStatus::Succeeded
        } else {
            DeploymentStatus::Canceled
        }
    }

    /// Earliest stage start.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.stages().filter_map(|(_, run)| run.started_at()).min()
    }

    /// End of the latest terminal stage, or `now` if none has finished.
    pub fn end_time_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.stages()
            .filter(|(stage, _)| self.stage_status(*stage).is_some_and(|s| s.is_terminal()))
            .filter_map(|(stage, run)| self.stage_end(stage, run))
            .max()
            .unwrap_or(now)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time_at(Utc::now())
    }

    /// Whole minutes from the earliest start to the latest end, or to `now`
    /// while any stage is still running. Never negative.
    pub fn duration_at(&self, now: DateTime<Utc>) -> i64 {
        let Some(start) = self.start_time() else {
            return 0;
        };

        let running = Stage::ALL
            .into_iter()
            .filter_map(|s| self.stage_status(s))
            .any(|s| !s.is_terminal());
        let end = if running {
            now
        } else {
            self.stages()
                .filter_map(|(stage, run)| self.stage_end(stage, run))
                .max()
                .unwrap_or(now)
        };

        (end - start).num_minutes().max(0)
    }

    pub fn duration(&self) -> i64 {
        self.duration_at(Utc::now())
    }

    /// Look up the author and move into the resolved phase.
    pub async fn resolve_author(self, resolver: &dyn AuthorResolver) -> ResolvedDeployment {
        let author = match &self.author_commit {
            Some(commit) => resolver.resolve_author(&commit.repo, &commit.commit_id).await,
            None => {
                debug!(deployment_id = %self.deployment_id(), "No commit to attribute");
                None
            }
        };
        ResolvedDeployment {
            deployment: self,
            author,
        }
    }

    /// Skip author lookup entirely.
    pub fn without_author(self) -> ResolvedDeployment {
        ResolvedDeployment {
            deployment: self,
            author: None,
        }
    }
}

/// A deployment whose author lookup has run exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDeployment {
    pub deployment: Deployment,
    pub author: Option<Author>,
}

impl ResolvedDeployment {
    pub fn view_at(&self, now: DateTime<Utc>) -> DeploymentView {
        let d = &self.deployment;
        let r = &d.record;
        DeploymentView {
            deployment_id: r.deployment_id.clone(),
            partition_key: r.partition_key.clone(),
            timestamp: r.timestamp,
            service: r.service.clone(),
            environment: r.env.clone(),
            image_tag: r.image_tag.clone(),
            source_commit_id: r.source_commit_id.clone(),
            hld_commit_id: r.hld_commit_id.clone(),
            manifest_commit_id: r.manifest_commit_id.clone(),
            source_run: d.source.clone(),
            hld_run: d.hld.clone(),
            cluster_run: d.cluster.clone(),
            pull_request: d.pull_request.clone(),
            sync_tag: d.sync_tag.clone(),
            cluster_synced: d.is_cluster_synced(),
            author: self.author.clone(),
            status_string: d.status(),
            duration_in_mins: d.duration_at(now),
            end_timestamp: d.end_time_at(now).to_rfc2822(),
            fetch_errors: d.fetch_errors.clone(),
        }
    }

    pub fn view(&self) -> DeploymentView {
        self.view_at(Utc::now())
    }
}

/// Caller-facing JSON shape: raw fields plus the derived values at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    pub deployment_id: String,
    pub partition_key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub service: Option<String>,
    pub environment: Option<String>,
    pub image_tag: Option<String>,
    pub source_commit_id: Option<String>,
    pub hld_commit_id: Option<String>,
    pub manifest_commit_id: Option<String>,
    pub source_run: Option<PipelineRun>,
    pub hld_run: Option<PipelineRun>,
    pub cluster_run: Option<PipelineRun>,
    pub pull_request: Option<PullRequest>,
    pub sync_tag: Option<Tag>,
    pub cluster_synced: bool,
    pub author: Option<Author>,
    pub status_string: DeploymentStatus,
    pub duration_in_mins: i64,
    pub end_timestamp: String,
    pub fetch_errors: Vec<StageFetchFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 17, 18, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn run(status: PipelineStatus, start: i64, end: Option<i64>) -> PipelineRun {
        PipelineRun::new("r", status).with_times(Some(at(start)), end.map(at))
    }

    fn deployment() -> Deployment {
        Deployment::new(StorageRecord::new("p", "d1"))
    }

    #[test]
    fn test_no_stages_is_unknown() {
        let d = deployment();
        assert_eq!(d.status(), DeploymentStatus::Unknown);
        assert_eq!(d.duration_at(at(100)), 0);
        assert_eq!(d.end_time_at(at(100)), at(100));
    }

    #[test]
    fn test_failure_dominates() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.hld = Some(run(PipelineStatus::Failed, 6, Some(8)));
        d.cluster = Some(run(PipelineStatus::InProgress, 9, None));
        assert_eq!(d.status(), DeploymentStatus::Failed);
    }

    #[test]
    fn test_running_stage_is_in_progress() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.hld = Some(run(PipelineStatus::NotStarted, 6, None));
        assert_eq!(d.status(), DeploymentStatus::InProgress);
    }

    #[test]
    fn test_all_succeeded() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.cluster = Some(run(PipelineStatus::Succeeded, 10, Some(12)));
        assert_eq!(d.status(), DeploymentStatus::Succeeded);
    }

    #[test]
    fn test_canceled_without_failure() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.hld = Some(run(PipelineStatus::Canceled, 6, Some(7)));
        assert_eq!(d.status(), DeploymentStatus::Canceled);
    }

    #[test]
    fn test_duration_spans_earliest_start_to_latest_end() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.hld = Some(run(PipelineStatus::Succeeded, 6, Some(8)));
        d.cluster = Some(run(PipelineStatus::Succeeded, 9, Some(21)));
        assert_eq!(d.duration_at(at(500)), 21);
        assert_eq!(d.end_time_at(at(500)), at(21));
    }

    #[test]
    fn test_duration_runs_to_now_while_in_progress() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.hld = Some(run(PipelineStatus::InProgress, 6, None));
        assert_eq!(d.duration_at(at(30)), 30);
        // Latest terminal stage, not now.
        assert_eq!(d.end_time_at(at(30)), at(5));
    }

    #[test]
    fn test_duration_never_negative() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::InProgress, 10, None));
        assert_eq!(d.duration_at(at(0)), 0);
    }

    #[test]
    fn test_duration_floors_to_whole_minutes() {
        let mut d = deployment();
        d.source = Some(
            PipelineRun::new("r", PipelineStatus::Succeeded)
                .with_times(Some(at(0)), Some(at(3) + Duration::seconds(59))),
        );
        assert_eq!(d.duration_at(at(100)), 3);
    }

    #[test]
    fn test_sync_tag_overrides_cluster_status() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.cluster = Some(run(PipelineStatus::InProgress, 6, None));
        assert_eq!(d.status(), DeploymentStatus::InProgress);

        d.sync_tag = Some(Tag {
            name: "SYNC".to_string(),
            commit: "ab4c9f1".to_string(),
            date: Some(at(14)),
            tagger: None,
            message: None,
        });
        assert_eq!(d.stage_status(Stage::Cluster), Some(PipelineStatus::Succeeded));
        assert_eq!(d.status(), DeploymentStatus::Succeeded);
        assert_eq!(d.end_time_at(at(60)), at(14));
        assert_eq!(d.duration_at(at(60)), 14);
    }

    #[test]
    fn test_sync_tag_does_not_mask_failed_cluster_run() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        d.cluster = Some(run(PipelineStatus::Failed, 6, Some(9)));
        d.sync_tag = Some(Tag {
            name: "SYNC".to_string(),
            commit: "ab4c9f1".to_string(),
            date: Some(at(14)),
            tagger: None,
            message: None,
        });

        assert_eq!(d.stage_status(Stage::Cluster), Some(PipelineStatus::Failed));
        assert_eq!(d.status(), DeploymentStatus::Failed);
        assert_eq!(d.end_time_at(at(60)), at(9));
    }

    #[test]
    fn test_view_carries_derived_fields() {
        let mut d = deployment();
        d.source = Some(run(PipelineStatus::Succeeded, 0, Some(5)));
        let view = d.without_author().view_at(at(60));

        assert_eq!(view.status_string, DeploymentStatus::Succeeded);
        assert_eq!(view.duration_in_mins, 5);
        assert_eq!(view.end_timestamp, at(5).to_rfc2822());
        assert!(view.author.is_none());

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["statusString"], "succeeded");
        assert_eq!(json["durationInMins"], 5);
        assert!(json.get("endTimestamp").is_some());
    }
}
