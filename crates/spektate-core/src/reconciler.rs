//! Deployment reconciliation.
//!
//! Joins storage records with the three stage clients and the VCS resolvers.
//! Records are reconciled concurrently and independently; output order is
//! input order. Nothing here aborts the batch: missing or failed lookups
//! leave the corresponding field absent, and pipeline fetch failures are
//! recorded on the deployment as [`StageFetchFailure`]s.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use spektate_state::StorageRecord;
use tracing::{debug, instrument};

use crate::deployment::{Deployment, StageFetchFailure};
use crate::obs;
use crate::pipeline::{PipelineRun, PipelineStageClient, Stage};
use crate::repository::{
    CommitRef, PullRequest, PullRequestResolver, RepoRef, Tag, TagResolver,
};

/// The three stage clients, one per stage.
#[derive(Clone)]
pub struct StageClients {
    pub source: Arc<dyn PipelineStageClient>,
    pub hld: Arc<dyn PipelineStageClient>,
    pub cluster: Arc<dyn PipelineStageClient>,
}

impl StageClients {
    pub fn client(&self, stage: Stage) -> &dyn PipelineStageClient {
        match stage {
            Stage::Source => self.source.as_ref(),
            Stage::Hld => self.hld.as_ref(),
            Stage::Cluster => self.cluster.as_ref(),
        }
    }
}

#[derive(Clone)]
struct SyncTagSource {
    resolver: Arc<dyn TagResolver>,
    manifest_repo: RepoRef,
}

#[derive(Clone)]
struct PullRequestSource {
    resolver: Arc<dyn PullRequestResolver>,
    default_repo: Option<RepoRef>,
}

/// Builds deployments from storage records.
///
/// Without `with_sync_tags` no cluster sync is ever confirmed; without
/// `with_pull_requests` no PR is ever attached.
#[derive(Clone)]
pub struct Reconciler {
    clients: StageClients,
    sync_tags: Option<SyncTagSource>,
    pull_requests: Option<PullRequestSource>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn PipelineStageClient>,
        hld: Arc<dyn PipelineStageClient>,
        cluster: Arc<dyn PipelineStageClient>,
    ) -> Self {
        Reconciler {
            clients: StageClients {
                source,
                hld,
                cluster,
            },
            sync_tags: None,
            pull_requests: None,
        }
    }

    /// Confirm cluster syncs against tags on the manifest repository.
    pub fn with_sync_tags(mut self, resolver: Arc<dyn TagResolver>, manifest_repo: RepoRef) -> Self {
        self.sync_tags = Some(SyncTagSource {
            resolver,
            manifest_repo,
        });
        self
    }

    /// Attach pull requests. `default_repo` is used when neither the record
    /// nor the HLD run names the repository the PR lives in.
    pub fn with_pull_requests(
        mut self,
        resolver: Arc<dyn PullRequestResolver>,
        default_repo: Option<RepoRef>,
    ) -> Self {
        self.pull_requests = Some(PullRequestSource {
            resolver,
            default_repo,
        });
        self
    }

    /// Reconcile `records` into deployments, preserving order.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn reconcile(&self, records: Vec<StorageRecord>) -> Vec<Deployment> {
        let started = Instant::now();
        obs::emit_reconcile_started(records.len());

        let tags = self.load_sync_tags(&records).await;
        let deployments = join_all(
            records
                .into_iter()
                .map(|record| self.reconcile_record(record, &tags)),
        )
        .await;

        let fetch_failures = deployments.iter().map(|d| d.fetch_errors.len()).sum();
        obs::emit_reconcile_finished(
            deployments.len(),
            fetch_failures,
            started.elapsed().as_millis() as u64,
        );
        deployments
    }

    /// Sync tags are fetched once per batch, and only if some record has a
    /// manifest commit to match.
    async fn load_sync_tags(&self, records: &[StorageRecord]) -> Vec<Tag> {
        let Some(source) = &self.sync_tags else {
            return Vec::new();
        };
        if records.iter().all(|r| r.manifest_commit_id.is_none()) {
            return Vec::new();
        }
        let tags = source.resolver.resolve_sync_tags(&source.manifest_repo).await;
        debug!(repo = %source.manifest_repo, count = tags.len(), "Loaded sync tags");
        tags
    }

    async fn reconcile_record(&self, record: StorageRecord, tags: &[Tag]) -> Deployment {
        let (source, hld, cluster) = tokio::join!(
            self.fetch_stage(Stage::Source, &record),
            self.fetch_stage(Stage::Hld, &record),
            self.fetch_stage(Stage::Cluster, &record),
        );

        let mut deployment = Deployment::new(record);
        for (stage, outcome) in [
            (Stage::Source, source),
            (Stage::Hld, hld),
            (Stage::Cluster, cluster),
        ] {
            match outcome {
                Ok(run) => deployment.set_stage(stage, run),
                Err(failure) => deployment.fetch_errors.push(failure),
            }
        }

        deployment.sync_tag = deployment
            .record
            .manifest_commit_id
            .as_deref()
            .and_then(|commit| tags.iter().find(|t| t.points_at(commit)))
            .cloned();

        deployment.pull_request = self.fetch_pull_request(&deployment).await;
        deployment.author_commit = author_commit(&deployment);
        deployment
    }

    async fn fetch_stage(
        &self,
        stage: Stage,
        record: &StorageRecord,
    ) -> Result<Option<PipelineRun>, StageFetchFailure> {
        let run_id = match stage {
            Stage::Source => record.source_build_id.as_deref(),
            Stage::Hld => record.hld_build_id.as_deref(),
            Stage::Cluster => record.cluster_build_id.as_deref(),
        };
        let Some(run_id) = run_id else {
            return Ok(None);
        };

        match self.clients.client(stage).get_run(run_id).await {
            Ok(Some(run)) => Ok(Some(run)),
            Ok(None) => {
                debug!(
                    deployment_id = %record.deployment_id,
                    stage = %stage,
                    run_id = %run_id,
                    "Pipeline run not found"
                );
                Ok(None)
            }
            Err(e) => {
                obs::emit_stage_fetch_failed(&record.deployment_id, stage, run_id, &e);
                Err(StageFetchFailure {
                    stage,
                    run_id: run_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn fetch_pull_request(&self, deployment: &Deployment) -> Option<PullRequest> {
        let source = self.pull_requests.as_ref()?;
        let pr_id = deployment.record.pr.as_deref()?;

        let repo = deployment
            .record
            .hld_repo
            .as_deref()
            .and_then(RepoRef::from_url)
            .or_else(|| deployment.hld.as_ref().and_then(|r| r.repository.clone()))
            .or_else(|| source.default_repo.clone());
        let Some(repo) = repo else {
            debug!(
                deployment_id = %deployment.deployment_id(),
                pr = %pr_id,
                "No repository known for pull request"
            );
            return None;
        };

        match source.resolver.resolve_pull_request(&repo, pr_id).await {
            Ok(pr) => Some(pr),
            Err(e) => {
                obs::emit_pull_request_lookup_failed(deployment.deployment_id(), pr_id, &e);
                None
            }
        }
    }
}

/// The source commit and the repository it lives in.
fn author_commit(deployment: &Deployment) -> Option<CommitRef> {
    let source = deployment.source.as_ref();
    let commit_id = source
        .and_then(|r| r.source_commit.clone())
        .or_else(|| deployment.record.source_commit_id.clone())?;
    let repo = source
        .and_then(|r| r.repository.clone())
        .or_else(|| {
            deployment
                .record
                .source_repo
                .as_deref()
                .and_then(RepoRef::from_url)
        })?;
    Some(CommitRef { repo, commit_id })
}

/// Free-function form of [`Reconciler::reconcile`] with no VCS enrichment.
pub async fn reconcile(
    records: Vec<StorageRecord>,
    source: Arc<dyn PipelineStageClient>,
    hld: Arc<dyn PipelineStageClient>,
    cluster: Arc<dyn PipelineStageClient>,
) -> Vec<Deployment> {
    Reconciler::new(source, hld, cluster).reconcile(records).await
}
