//! Spektate - deployment dashboard CLI
//!
//! The `spektate` command joins the deployment table with the Azure DevOps
//! pipelines and repositories behind each deployment.
//!
//! ## Commands
//!
//! - `deployments`: Reconciled deployments with status, duration and author
//! - `runs`: Recent runs of one pipeline stage
//! - `tags`: Sync tags on the manifest repository
//! - `pr`: Pull request metadata

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, Level};

use spektate_core::config::{self, SpektateConfig};
use spektate_core::{
    resolve_authors, AzureBuildPipeline, AzureDevOpsRepo, AzurePipelineConfig,
    AzureReleasePipeline, DeploymentView, HttpTransport, PipelineRun, PipelineStageClient,
    PullRequestResolver, Reconciler, Stage, TagResolver, Transport,
};
use spektate_state::{AzureTableConfig, AzureTableStore, DeploymentFilter, DeploymentStore};

#[derive(Parser)]
#[command(name = "spektate")]
#[command(author = "Spektate Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deployment observability for GitOps pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Connection settings. Every flag can also come from its environment
/// variable.
#[derive(Args, Debug, Default)]
struct Settings {
    /// Azure DevOps organization
    #[arg(long, env = "AZURE_ORG", global = true)]
    org: Option<String>,

    /// Azure DevOps project
    #[arg(long, env = "AZURE_PROJECT", global = true)]
    project: Option<String>,

    /// Personal access token for pipelines
    #[arg(long, env = "AZURE_PIPELINE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pipeline_token: Option<String>,

    /// Personal access token for source repositories
    #[arg(long, env = "SOURCE_REPO_ACCESS_TOKEN", hide_env_values = true, global = true)]
    source_token: Option<String>,

    /// Manifest repository name
    #[arg(long, env = "MANIFEST", global = true)]
    manifest: Option<String>,

    /// Personal access token for the manifest repository
    #[arg(long, env = "MANIFEST_ACCESS_TOKEN", hide_env_values = true, global = true)]
    manifest_token: Option<String>,

    /// HLD repository name, for pull requests
    #[arg(long, env = "HLD_REPO", global = true)]
    hld_repo: Option<String>,

    /// Whether the HLD stage is a classic release (default: true)
    #[arg(long, env = "HLD_IS_RELEASE", global = true)]
    hld_is_release: Option<String>,

    /// Tag the cluster sync agent moves
    #[arg(long, env = "SYNC_TAG", global = true)]
    sync_tag: Option<String>,

    /// Storage account holding the deployment table
    #[arg(long, env = "STORAGE_ACCOUNT_NAME", global = true)]
    storage_account: Option<String>,

    /// Storage account key (base64)
    #[arg(long, env = "STORAGE_ACCOUNT_KEY", hide_env_values = true, global = true)]
    storage_key: Option<String>,

    /// Deployment table name
    #[arg(long, env = "STORAGE_TABLE_NAME", global = true)]
    storage_table: Option<String>,

    /// Partition of the deployment table to read
    #[arg(long, env = "STORAGE_PARTITION_KEY", global = true)]
    partition_key: Option<String>,
}

impl Settings {
    fn value(&self, key: &str) -> Option<String> {
        let value = match key {
            config::AZURE_ORG => &self.org,
            config::AZURE_PROJECT => &self.project,
            config::AZURE_PIPELINE_ACCESS_TOKEN => &self.pipeline_token,
            config::SOURCE_REPO_ACCESS_TOKEN => &self.source_token,
            config::MANIFEST => &self.manifest,
            config::MANIFEST_ACCESS_TOKEN => &self.manifest_token,
            config::HLD_REPO => &self.hld_repo,
            config::HLD_IS_RELEASE => &self.hld_is_release,
            config::SYNC_TAG => &self.sync_tag,
            config::STORAGE_ACCOUNT_NAME => &self.storage_account,
            config::STORAGE_ACCOUNT_KEY => &self.storage_key,
            config::STORAGE_TABLE_NAME => &self.storage_table,
            config::STORAGE_PARTITION_KEY => &self.partition_key,
            _ => return None,
        };
        value.clone()
    }

    fn to_config(&self) -> SpektateConfig {
        SpektateConfig::from_lookup(|key| self.value(key))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List deployments with their status, duration and author
    Deployments {
        #[command(flatten)]
        filter: FilterArgs,

        /// Print JSON instead of one line per deployment
        #[arg(long)]
        json: bool,
    },

    /// List recent runs of one stage
    Runs {
        /// Stage to list (source, hld or cluster)
        #[arg(long)]
        stage: Stage,

        /// Only runs queued at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Print JSON instead of one line per run
        #[arg(long)]
        json: bool,
    },

    /// List sync tags on the manifest repository
    Tags {
        /// Print JSON instead of one line per tag
        #[arg(long)]
        json: bool,
    },

    /// Show a pull request
    Pr {
        /// Pull request id
        id: String,

        /// Repository the pull request was raised against
        #[arg(long)]
        repo: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

/// Exact-match filters over deployment records.
#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Environment (ring) name
    #[arg(long)]
    env: Option<String>,

    /// Container image tag
    #[arg(long)]
    image_tag: Option<String>,

    /// Source build id
    #[arg(long)]
    build_id: Option<String>,

    /// Source commit id
    #[arg(long)]
    commit: Option<String>,

    /// Service name
    #[arg(long)]
    service: Option<String>,

    /// Deployment id
    #[arg(long)]
    deployment_id: Option<String>,
}

impl From<FilterArgs> for DeploymentFilter {
    fn from(args: FilterArgs) -> Self {
        DeploymentFilter {
            env: args.env,
            image_tag: args.image_tag,
            source_build_id: args.build_id,
            commit_id: args.commit,
            service: args.service,
            deployment_id: args.deployment_id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    spektate_core::init_tracing(cli.json_logs, level);

    let config = cli.settings.to_config();

    match cli.command {
        Commands::Deployments { filter, json } => {
            cmd_deployments(&config, filter.into(), json).await
        }
        Commands::Runs { stage, since, json } => cmd_runs(&config, stage, since, json).await,
        Commands::Tags { json } => cmd_tags(&config, json).await,
        Commands::Pr { id, repo, json } => cmd_pr(&config, &id, &repo, json).await,
    }
}

fn transport() -> Result<Arc<dyn Transport>> {
    let transport = HttpTransport::new().context("Failed to build HTTP client")?;
    Ok(Arc::new(transport))
}

fn stage_client(
    config: &SpektateConfig,
    stage: Stage,
    transport: &Arc<dyn Transport>,
) -> Arc<dyn PipelineStageClient> {
    let pipeline = AzurePipelineConfig::new(&config.org, &config.project)
        .with_token(&config.pipeline_access_token);
    match stage {
        Stage::Hld if config.hld_is_release => {
            Arc::new(AzureReleasePipeline::new(pipeline, transport.clone()))
        }
        _ => Arc::new(AzureBuildPipeline::new(pipeline, transport.clone())),
    }
}

fn source_repo(config: &SpektateConfig, transport: &Arc<dyn Transport>) -> AzureDevOpsRepo {
    AzureDevOpsRepo::new(transport.clone(), Some(config.source_token().to_string()))
}

fn manifest_repo(config: &SpektateConfig, transport: &Arc<dyn Transport>) -> AzureDevOpsRepo {
    AzureDevOpsRepo::new(transport.clone(), Some(config.manifest_token().to_string()))
        .with_sync_tag(&config.sync_tag)
}

/// Reconcile and print deployments
async fn cmd_deployments(
    config: &SpektateConfig,
    filter: DeploymentFilter,
    json: bool,
) -> Result<()> {
    config.validate().context("Server is not set up correctly")?;

    let store = AzureTableStore::new(AzureTableConfig::new(
        &config.storage_account_name,
        &config.storage_account_key,
        &config.storage_table_name,
    ))
    .context("Failed to set up deployment storage")?;
    let records = store
        .list_records(&config.storage_partition_key)
        .await
        .context("Failed to list deployment records")?;
    let total = records.len();
    let records = filter.apply(records);
    debug!(total, kept = records.len(), "Filtered deployment records");

    let transport = transport()?;
    let repo = Arc::new(source_repo(config, &transport));
    let mut reconciler = Reconciler::new(
        stage_client(config, Stage::Source, &transport),
        stage_client(config, Stage::Hld, &transport),
        stage_client(config, Stage::Cluster, &transport),
    )
    .with_pull_requests(repo.clone(), config.hld_repo_ref());
    if let Some(manifest) = config.manifest_repo_ref() {
        reconciler = reconciler.with_sync_tags(Arc::new(manifest_repo(config, &transport)), manifest);
    }

    let deployments = reconciler.reconcile(records).await;
    let resolved = resolve_authors(deployments, repo).await;

    let now = Utc::now();
    let views: Vec<DeploymentView> = resolved.iter().map(|d| d.view_at(now)).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    if views.is_empty() {
        println!("No deployments found");
        return Ok(());
    }
    for view in &views {
        println!("{}", deployment_line(view));
    }
    Ok(())
}

fn deployment_line(view: &DeploymentView) -> String {
    let dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{}  {:<11}  {:>4}m  {}  {}  {}  {}",
        view.deployment_id,
        view.status_string.as_str(),
        view.duration_in_mins,
        dash(&view.environment),
        dash(&view.service),
        dash(&view.image_tag),
        view.author.as_ref().map(|a| a.name.as_str()).unwrap_or("-"),
    );
    if let Some(pr) = &view.pull_request {
        line.push_str(&format!("  PR {}", pr.id));
    }
    if view.cluster_synced {
        line.push_str("  synced");
    }
    for failure in &view.fetch_errors {
        line.push_str(&format!("  [{} {} unavailable]", failure.stage, failure.run_id));
    }
    line
}

/// List recent runs of one stage
async fn cmd_runs(
    config: &SpektateConfig,
    stage: Stage,
    since: Option<DateTime<Utc>>,
    json: bool,
) -> Result<()> {
    config.validate_devops().context("Server is not set up correctly")?;

    let client = stage_client(config, stage, &transport()?);
    let runs = client
        .get_runs(since)
        .await
        .context(format!("Failed to list {} runs", stage))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No {} runs found", stage);
        return Ok(());
    }
    for run in &runs {
        println!("{}", run_line(run));
    }
    Ok(())
}

fn run_line(run: &PipelineRun) -> String {
    let started = run
        .started_at()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let commit = run
        .source_commit
        .as_deref()
        .map(|c| c.get(..7).unwrap_or(c))
        .unwrap_or("-");
    format!(
        "{}  {:<11}  {}  {}  {}",
        run.id,
        run.status.as_str(),
        started,
        commit,
        run.build_number.as_deref().unwrap_or("-"),
    )
}

/// List sync tags on the manifest repository
async fn cmd_tags(config: &SpektateConfig, json: bool) -> Result<()> {
    config.validate_devops().context("Server is not set up correctly")?;
    let manifest = config
        .manifest_repo_ref()
        .context("No manifest repository configured (set MANIFEST)")?;

    let repo = manifest_repo(config, &transport()?);
    let tags = repo.resolve_sync_tags(&manifest).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
        return Ok(());
    }
    println!("Releases: {}", repo.releases_url(&manifest));
    if tags.is_empty() {
        println!("No '{}' tags found on {}", repo.sync_tag(), manifest);
        return Ok(());
    }
    for tag in &tags {
        let date = tag
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  {}",
            tag.name,
            tag.short_commit(),
            date,
            tag.tagger.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Show one pull request
async fn cmd_pr(config: &SpektateConfig, id: &str, repo_name: &str, json: bool) -> Result<()> {
    config.validate_devops().context("Server is not set up correctly")?;

    let repo = config.repo(repo_name);
    let pr = source_repo(config, &transport()?)
        .resolve_pull_request(&repo, id)
        .await
        .context(format!("Failed to resolve pull request {} in {}", id, repo))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pr)?);
        return Ok(());
    }
    println!("PR {}: {}", pr.id, pr.title);
    println!("  {} -> {}", pr.source_branch, pr.target_branch);
    if let Some(merged_by) = &pr.merged_by {
        println!("  Merged by: {}", merged_by.name);
    }
    println!("  {}", pr.url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use spektate_core::{Author, PipelineStatus, ResolvedDeployment, StorageRecord};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deployment_filters_parse() {
        let cli = Cli::try_parse_from([
            "spektate",
            "deployments",
            "--env",
            "dev",
            "--build-id",
            "7271",
            "--json",
        ])
        .unwrap();
        let Commands::Deployments { filter, json } = cli.command else {
            panic!("expected deployments");
        };
        assert!(json);
        let filter: DeploymentFilter = filter.into();
        assert_eq!(filter.env.as_deref(), Some("dev"));
        assert_eq!(filter.source_build_id.as_deref(), Some("7271"));
        assert!(filter.service.is_none());
    }

    #[test]
    fn test_runs_stage_parses() {
        let cli = Cli::try_parse_from(["spektate", "runs", "--stage", "hld"]).unwrap();
        assert!(matches!(cli.command, Commands::Runs { stage: Stage::Hld, since: None, .. }));

        assert!(Cli::try_parse_from(["spektate", "runs", "--stage", "deploy"]).is_err());
    }

    #[test]
    fn test_settings_feed_config() {
        let settings = Settings {
            org: Some("org".to_string()),
            project: Some("project".to_string()),
            pipeline_token: Some("pat".to_string()),
            manifest: Some("manifest".to_string()),
            ..Default::default()
        };
        let config = settings.to_config();
        assert_eq!(config.org, "org");
        assert_eq!(config.manifest_token(), "pat");
        assert_eq!(config.sync_tag, "SYNC");
        assert!(config.validate_devops().is_ok());
    }

    #[test]
    fn test_deployment_line() {
        let mut record = StorageRecord::new("p", "d1");
        record.env = Some("dev".to_string());
        let resolved = ResolvedDeployment {
            deployment: spektate_core::Deployment::new(record),
            author: Some(Author {
                name: "Ada".to_string(),
                username: None,
                url: None,
                image_url: None,
            }),
        };
        let line = deployment_line(&resolved.view_at(Utc::now()));
        assert!(line.starts_with("d1  unknown"));
        assert!(line.contains("dev"));
        assert!(line.ends_with("Ada"));
    }

    #[test]
    fn test_run_line_shortens_commit() {
        let run = PipelineRun::new("7271", PipelineStatus::Succeeded).with_commit("be3c7f6a1d2e");
        let line = run_line(&run);
        assert!(line.starts_with("7271  succeeded"));
        assert!(line.contains("be3c7f6 "));
    }
}
