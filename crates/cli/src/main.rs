//! `rusty-flow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — check a workflow JSON file and print its execution order.
//! - `run`      — execute a workflow file and stream its log to stdout.
//! - `status`   — print a stored execution record.
//! - `migrate`  — run pending database migrations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use db::{ExecutionStatus, ExecutionStore, MemoryStore, PgStore, WorkflowStore};
use engine::{ExecutorConfig, UnknownKindPolicy, WorkflowExecutor};
use nodes::{InMemoryCredentials, Integrations, NodeRegistry};

#[derive(Parser)]
#[command(name = "rusty-flow", about = "DAG workflow execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file (`{ nodes, edges }`).
        path: PathBuf,
    },
    /// Execute a workflow definition and follow its log until it finishes.
    Run {
        path: PathBuf,
        /// JSON array of credentials (`[{ id, type, data }]`).
        #[arg(long)]
        credentials: Option<PathBuf>,
        /// Persist to Postgres instead of memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        #[arg(long, env = "RUSTY_FLOW_MAX_CONCURRENCY", default_value_t = 4)]
        max_concurrency: usize,
        /// `succeed` or `fail` for steps whose kind has no executor.
        #[arg(long, env = "RUSTY_FLOW_UNKNOWN_KIND", default_value = "succeed")]
        unknown_kind: UnknownKindPolicy,
    },
    /// Print a stored execution record as JSON.
    Status {
        execution_id: Uuid,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("engine=info,nodes=info,rusty_flow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Validate { path } => validate(&path),
        Command::Run {
            path,
            credentials,
            database_url,
            max_concurrency,
            unknown_kind,
        } => {
            let config = ExecutorConfig {
                max_concurrent_steps: max_concurrency,
                unknown_kind,
            };
            let status = run(&path, credentials.as_deref(), database_url.as_deref(), config).await?;
            if status == ExecutionStatus::Failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Status { execution_id, database_url } => {
            let store = PgStore::new(db::pool::create_pool(&database_url, 2).await?);
            let record = store
                .get(execution_id)
                .await?
                .with_context(|| format!("no execution {execution_id}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2).await?;
            db::pool::run_migrations(&pool).await?;
            info!("Migrations applied successfully");
            Ok(())
        }
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn registry(credentials: Option<&Path>) -> Result<NodeRegistry> {
    let credentials = match credentials {
        Some(path) => InMemoryCredentials::from_json(read_json(path)?)
            .with_context(|| format!("invalid credentials in {}", path.display()))?,
        None => InMemoryCredentials::new(),
    };
    Ok(NodeRegistry::builtin(Integrations::new(Arc::new(credentials))))
}

fn validate(path: &Path) -> Result<()> {
    let definition = read_json(path)?;
    let prepared = engine::prepare(&definition, &registry(None)?)?;
    let order: Vec<&str> = prepared
        .topology
        .order()
        .iter()
        .map(|&i| prepared.graph.steps[i].id.as_str())
        .collect();
    println!("Workflow is valid. Execution order: {}", order.join(" -> "));
    Ok(())
}

async fn run(
    path: &Path,
    credentials: Option<&Path>,
    database_url: Option<&str>,
    config: ExecutorConfig,
) -> Result<ExecutionStatus> {
    let definition = read_json(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_owned());

    let (workflows, store) = match database_url {
        Some(url) => {
            let store = Arc::new(PgStore::new(db::pool::create_pool(url, 5).await?));
            let workflows: Arc<dyn WorkflowStore> = store.clone();
            let store: Arc<dyn ExecutionStore> = store;
            (workflows, store)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let workflows: Arc<dyn WorkflowStore> = store.clone();
            let store: Arc<dyn ExecutionStore> = store;
            (workflows, store)
        }
    };

    let workflow = workflows.create_workflow(&name, definition).await?;
    let executor = WorkflowExecutor::new(workflows, store.clone(), registry(credentials)?, config);
    let pending = executor.start_execution(workflow.id).await?;
    info!(execution_id = %pending.id, "execution started");

    let mut printed = 0;
    loop {
        let record = store
            .get(pending.id)
            .await?
            .with_context(|| format!("execution {} disappeared", pending.id))?;
        for entry in record.logs.iter().skip(printed) {
            let step = entry.step_id.as_deref().map(|s| format!("[{s}] ")).unwrap_or_default();
            let level = format!("{:?}", entry.level).to_uppercase();
            println!("{} {level:<5} {step}{}", entry.timestamp.format("%H:%M:%S"), entry.message);
        }
        printed = record.logs.len();
        if record.status.is_terminal() {
            if let Some(results) = &record.results {
                println!("{}", serde_json::to_string_pretty(results)?);
            }
            return Ok(record.status);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
