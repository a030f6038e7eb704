//! Commissioner CLI - run orchestrated operations against a universe file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use commissioner::backend::SimulatedNodeBackend;
use commissioner::config::{LogFormat, OrchestratorConfig};
use commissioner::model::{
    Operation, ResizeNodeParams, ResumeParams, TlsToggleParams, Universe, UserIntent,
};
use commissioner::orchestrator::RunOptions;
use commissioner::store::InMemoryUniverseStore;
use commissioner::telemetry::init_tracing;
use commissioner::validation::check_resize_is_possible;
use commissioner::{Context, TaskOrchestrator};

/// Commissioner - orchestrate resume, resize and TLS changes on a universe
#[derive(Parser, Debug)]
#[command(name = "commissioner", version, about, long_about = None)]
struct Cli {
    /// Path to the orchestrator configuration file
    #[arg(short = 'c', long, env = "COMMISSIONER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format (overrides the config file)
    #[arg(long, env = "COMMISSIONER_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Seconds to wait for a server to report healthy (overrides the config file)
    #[arg(long, env = "COMMISSIONER_HEALTH_TIMEOUT_SECS")]
    health_timeout_secs: Option<u64>,

    /// Allow instance types the provider marks unsupported
    #[arg(long, env = "COMMISSIONER_ALLOW_UNSUPPORTED_INSTANCES")]
    allow_unsupported_instances: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resume a paused universe
    Resume {
        #[command(flatten)]
        target: Target,

        /// Customer owning the universe, forwarded to activity telemetry
        #[arg(long)]
        customer: Option<Uuid>,
    },

    /// Change instance type and/or volume size of a cluster's nodes
    Resize {
        #[command(flatten)]
        target: Target,

        /// Path to the resize request YAML
        #[arg(short = 'r', long)]
        request: PathBuf,
    },

    /// Enable or disable node-to-node and client-to-node encryption
    TlsToggle {
        #[command(flatten)]
        target: Target,

        /// Path to the TLS toggle request YAML
        #[arg(short = 'r', long)]
        request: PathBuf,
    },

    /// Check whether one user intent can be resized into another
    CheckResize {
        /// Path to the current user intent YAML
        #[arg(long)]
        current: PathBuf,

        /// Path to the desired user intent YAML
        #[arg(long)]
        desired: PathBuf,

        /// Reject requests that change neither disk nor instance type
        #[arg(long)]
        verify_volume_size: bool,
    },
}

/// Universe file an operation runs against
#[derive(clap::Args, Debug)]
struct Target {
    /// Path to the universe YAML
    #[arg(short = 'u', long)]
    universe: PathBuf,

    /// Write the committed universe here instead of stdout
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Write the finished task record here as JSON
    #[arg(long)]
    task_report: Option<PathBuf>,
}

async fn read_yaml<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

async fn load_config(cli: &Cli) -> anyhow::Result<OrchestratorConfig> {
    let mut config = match &cli.config {
        Some(path) => OrchestratorConfig::load(path).await?,
        None => OrchestratorConfig::default(),
    };
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Some(timeout) = cli.health_timeout_secs {
        config.health_check.timeout_secs = timeout;
    }
    if cli.allow_unsupported_instances {
        config.allow_unsupported_instances = true;
    }
    Ok(config)
}

async fn run_operation(
    config: OrchestratorConfig,
    target: &Target,
    build: impl FnOnce(&Universe) -> Operation,
) -> anyhow::Result<()> {
    let universe: Universe = read_yaml(&target.universe).await?;
    let operation = build(&universe);

    let store = Arc::new(InMemoryUniverseStore::new());
    store.insert(universe.clone());
    let ctx = Context::builder(store.clone())
        .node_backend(Arc::new(SimulatedNodeBackend::from_universe(&universe)))
        .config(config)
        .build();
    let orchestrator = TaskOrchestrator::new(Arc::new(ctx));

    // The report and the saved universe are written for failed runs too,
    // so the operator sees the node states the run left behind.
    let task_id = Uuid::new_v4();
    let outcome = orchestrator
        .run_with(
            operation,
            RunOptions {
                task_id: Some(task_id),
                cancel: None,
            },
        )
        .await;
    let task = orchestrator
        .tasks()
        .get(task_id)
        .with_context(|| format!("task {task_id} missing from the registry"))?;
    info!(
        task = %task.id,
        operation = %task.operation,
        status = ?task.status,
        groups = task.groups_completed,
        "task finished"
    );
    if let Some(path) = &target.task_report {
        let report = serde_json::to_string_pretty(&task)?;
        tokio::fs::write(path, report)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let saved = store
        .get(universe.universe_uuid)
        .with_context(|| format!("universe {} missing from the store", universe.universe_uuid))?;
    if saved.version != universe.version {
        let yaml = serde_yaml::to_string(&saved)
            .map_err(|e| anyhow::anyhow!("Failed to serialize universe: {}", e))?;
        match &target.output {
            Some(path) => tokio::fs::write(path, yaml)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?,
            None => println!("{yaml}"),
        }
    }

    outcome?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).await?;
    init_tracing(config.log_format)?;

    match cli.command {
        Commands::Resume { target, customer } => {
            run_operation(config, &target, |u| {
                Operation::Resume(ResumeParams {
                    universe_uuid: u.universe_uuid,
                    customer_uuid: customer,
                })
            })
            .await
        }
        Commands::Resize { target, request } => {
            let mut params: ResizeNodeParams = read_yaml(&request).await?;
            run_operation(config, &target, move |u| {
                params.base.universe_uuid = u.universe_uuid;
                Operation::ResizeNode(params)
            })
            .await
        }
        Commands::TlsToggle { target, request } => {
            let mut params: TlsToggleParams = read_yaml(&request).await?;
            run_operation(config, &target, move |u| {
                params.base.universe_uuid = u.universe_uuid;
                Operation::TlsToggle(params)
            })
            .await
        }
        Commands::CheckResize {
            current,
            desired,
            verify_volume_size,
        } => {
            let current: UserIntent = read_yaml(&current).await?;
            let desired: UserIntent = read_yaml(&desired).await?;
            check_resize_is_possible(
                Some(&current),
                Some(&desired),
                config.allow_unsupported_instances,
                verify_volume_size,
                &config.instance_catalog(),
            )?;
            println!(
                "resize from {} to {} is possible",
                current.instance_type, desired.instance_type
            );
            Ok(())
        }
    }
}
