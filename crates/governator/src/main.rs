use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use governator::config::EngineConfig;
use governator::layout::Layout;
use governator::supervisor::{status_summary, Supervisor};
use governator::{migrate, planning, worktree};

#[derive(Parser)]
#[command(name = "governator", about = "File-backed execution engine for LLM worker pipelines")]
struct Cli {
    /// Repository root (defaults to the current directory).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor loop until the index is quiescent.
    Run {
        /// Override the poll interval in seconds.
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Print a read-only summary of the task index.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let repo_root = match cli.repo {
        Some(path) => path,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    if repo_root.as_os_str().is_empty() {
        bail!("repository root must not be empty");
    }
    let layout = Layout::new(&repo_root);

    match cli.command {
        Command::Run { poll_interval } => {
            // The engine only runs inside a git repository.
            worktree::git_in(&repo_root, &["rev-parse", "--git-dir"])
                .with_context(|| format!("{} is not a git repository", repo_root.display()))?;

            let applied = migrate::run_migrations(&layout)?;
            if applied > 0 {
                info!(applied, "durable-state migrations applied");
            }

            let mut config = EngineConfig::load(&layout)?;
            if let Some(secs) = poll_interval {
                config.poll_interval_seconds = secs;
            }

            if !layout.index_path().is_file() {
                bail!(
                    "no task index at {}; run planning first",
                    layout.index_path().display()
                );
            }

            info!(
                repo = %repo_root.display(),
                poll_interval_seconds = config.poll_interval_seconds,
                global_cap = config.concurrency.global,
                cli = %config.workers.cli,
                "starting supervisor"
            );
            let mut supervisor = Supervisor::new(layout, config);
            let code = supervisor.run().await?;
            std::process::exit(code);
        }
        Command::Status => {
            let index = taskindex::store::load(&layout.index_path())
                .with_context(|| format!("failed to load {}", layout.index_path().display()))?;
            print!("{}", status_summary(&index));

            let spec = planning::PlanningSpec::load(&layout.planning_spec_path())?;
            print!("{}", planning::render(&planning::progress(&spec, &index)));

            match taskindex::detect_drift(&repo_root, &index.digests) {
                Ok(report) if report.has_drift => println!("{}", report.message),
                Ok(_) => {}
                Err(e) => eprintln!("drift check failed: {e:#}"),
            }

            let state_path = layout.supervisor_state_path();
            if state_path.is_file() {
                let state = std::fs::read_to_string(&state_path)?;
                println!("supervisor state:\n{state}");
            }
            Ok(())
        }
    }
}
