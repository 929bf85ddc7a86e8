use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use governator_core::EngineError;
use governator_store::{EngineConfig, Index, PlanningSpec, PlanningStep, RepoPaths, SupervisorState, Task, Validation, WorkersConfig};

#[derive(Parser)]
#[command(name = "governator", about = "repository-scoped multi-stage agent orchestration engine")]
struct Cli {
    /// Repository root (defaults to the current directory).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold the `_governator/` tree in a fresh repository.
    Init {
        /// Overwrite an existing `_governator/` tree.
        #[arg(long)]
        force: bool,
    },
    /// Run the self-run guard then drive the supervisor loop to
    /// completion or until SIGINT/SIGTERM.
    Start,
    /// Print a one-shot summary of the index and supervisor state.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GOVERNATOR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let repo_root = cli.repo.unwrap_or_else(|| PathBuf::from("."));

    let result = match cli.command {
        Commands::Init { force } => cmd_init(&repo_root, force),
        Commands::Start => cmd_start(&repo_root).await,
        Commands::Status => cmd_status(&repo_root),
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(exit_code_for(&e));
    }
    Ok(())
}

/// Exit codes (spec.md §6): 0 healthy completion; non-zero for
/// initialization, drift, or fatal supervisor errors, with drift and
/// guard states carrying distinguishable sentinel codes.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Configuration(_)) => 2,
        Some(EngineError::PlanningDrift(_)) => 3,
        Some(EngineError::SupervisorLockHeld) => 4,
        Some(EngineError::GuardCooldown { .. }) => 5,
        None => 1,
    }
}

/// Write a fresh `_governator/` tree: an index with only the planning
/// task, a single-step placeholder planning spec, and a config with an
/// empty-but-valid worker command the operator is expected to replace
/// (spec.md §6 file-system layout).
fn cmd_init(repo_root: &Path, force: bool) -> Result<()> {
    let paths = RepoPaths::new(repo_root);

    if paths.index_json().exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            paths.index_json().display()
        );
    }

    let mut index = Index::empty();
    index.tasks.push(Task::new_planning("planner", "_governator/roles/planner.md"));
    governator_store::index::save(&paths.index_json(), &index)?;

    let spec = PlanningSpec {
        version: 1,
        steps: vec![PlanningStep {
            id: "gap-analysis".to_string(),
            name: "Gap analysis".to_string(),
            prompt: "_governator/planning/gap-analysis.md".to_string(),
            role: "planner".to_string(),
            validations: vec![Validation::Command { run: "true".to_string() }],
        }],
    };
    std::fs::write(paths.planning_json(), serde_json::to_string_pretty(&spec)?)
        .with_context(|| format!("failed to write {}", paths.planning_json().display()))?;

    let config = EngineConfig {
        workers: WorkersConfig { default: vec!["echo".to_string(), "{task_path}".to_string()], roles: Default::default() },
        ..Default::default()
    };
    std::fs::write(paths.config_json(), serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("failed to write {}", paths.config_json().display()))?;

    std::fs::create_dir_all(paths.tasks_dir())?;
    std::fs::create_dir_all(paths.roles_dir())?;
    std::fs::write(paths.role_prompt("planner"), "You are the planner.\n")?;

    println!("scaffolded _governator/ under {}", repo_root.display());
    println!("edit {} to point workers.default at a real agent command before running `governator start`", paths.config_json().display());
    Ok(())
}

async fn cmd_start(repo_root: &Path) -> Result<()> {
    governator_core::Engine::open(repo_root)?.run().await
}

fn cmd_status(repo_root: &Path) -> Result<()> {
    let paths = RepoPaths::new(repo_root);

    let index = governator_store::index::load(&paths.index_json())?
        .with_context(|| format!("no index at {}; run `governator init` first", paths.index_json().display()))?;

    let backlog = governator_store::index::count_backlog(&index);
    let complete = governator_store::index::execution_complete(&index);
    println!("tasks: {} backlog: {} execution_complete: {}", index.tasks.len(), backlog, complete);
    for task in &index.tasks {
        println!("task={} role={} state={}", task.id, task.role, task.state);
    }

    match SupervisorState::load(&paths.supervisor_json())? {
        Some(state) => println!(
            "supervisor: run_state={} pid={} last_sweep_at={}",
            state.run_state.as_str(),
            state.pid,
            state.last_sweep_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".to_string())
        ),
        None => println!("supervisor: not yet started"),
    }

    Ok(())
}
