//! Spektate Core Library
//!
//! Reconciles deployment records with the pipeline runs of their three
//! stages (source build, HLD, cluster sync), enriches them with VCS data
//! (authors, sync tags, pull requests) and derives an overall status and
//! duration per deployment.
//!
//! ## Layer 1 - Reconciliation
//!
//! Storage lives in `spektate-state`; this crate only reads from it.

pub mod config;
pub mod deployment;
pub mod error;
pub mod fakes;
pub mod fanout;
pub mod obs;
pub mod pipeline;
pub mod reconciler;
pub mod repository;
pub mod telemetry;
pub mod transport;

pub use config::SpektateConfig;
pub use deployment::{
    Deployment, DeploymentStatus, DeploymentView, ResolvedDeployment, StageFetchFailure,
};
pub use error::{ConfigError, LookupError, PipelineFetchError, TransportError};
pub use fanout::resolve_authors;
pub use pipeline::{
    AzureBuildPipeline, AzurePipelineConfig, AzureReleasePipeline, PipelineRun,
    PipelineStageClient, PipelineStatus, Stage,
};
pub use reconciler::{reconcile, Reconciler, StageClients};
pub use repository::{
    releases_url, Author, AuthorResolver, AzureDevOpsRepo, CommitRef, PullRequest,
    PullRequestResolver, RepoRef, Tag, TagResolver,
};
pub use transport::{HttpResponse, HttpTransport, Transport};

pub use spektate_state::{DeploymentFilter, DeploymentStore, StorageRecord};

pub use obs::{
    emit_author_lookup_failed, emit_authors_resolved, emit_pull_request_lookup_failed,
    emit_reconcile_finished, emit_reconcile_started, emit_stage_fetch_failed,
};
pub use telemetry::init_tracing;

/// Spektate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
