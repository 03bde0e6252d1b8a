mod config;
mod gate_cmd;
mod git_check_cmd;
mod harnesses_cmd;
mod list_cmd;
mod ready_cmd;
mod run_cmd;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use drover_store::{JsonFileTaskStore, Priority, TaskFilter, TaskKind, TaskStatus};

use config::{DroverConfig, Overrides};

#[derive(Parser)]
#[command(name = "drover", about = "Drive AI coding agents through a gated task backlog")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, short = 'C', global = true)]
    project: Option<PathBuf>,

    /// Backlog file (overrides DROVER_TASKS and the default .drover/tasks.json)
    #[arg(long, global = true)]
    tasks: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
pub struct FilterArgs {
    /// Only tasks in this epic
    #[arg(long)]
    epic: Option<String>,
    /// Only tasks carrying this label
    #[arg(long)]
    label: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> TaskFilter {
        TaskFilter {
            status: None,
            epic: self.epic.clone(),
            label: self.label.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter .drover/config.toml and an empty backlog
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// List the backlog with each task's status
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only tasks in this status (open, in_progress, closed)
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Only tasks of this type (task, feature, bugfix, epic, gate, checkpoint, review)
        #[arg(long)]
        kind: Option<TaskKind>,
        /// Only tasks at this priority (P0..P4)
        #[arg(long)]
        priority: Option<Priority>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List tasks that are ready to run, most urgent first
    Ready {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the task the run loop would work on next
    Next {
        #[command(flatten)]
        filter: FilterArgs,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Approve (close) a gate, checkpoint or review task
    Approve {
        /// Gate ID to approve
        gate_id: String,
    },
    /// Show which gate, if any, blocks a task
    Gate {
        /// Task ID to inspect
        task_id: String,
    },
    /// List agent backends and whether they are installed
    Harnesses {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Check that the repository has no uncommitted changes
    GitCheck {
        /// Report changes without failing
        #[arg(long)]
        advisory: bool,
    },
    /// Work through the backlog until it is done or a limit is reached
    Run {
        /// Backend to use (claude, codex, aider, opencode)
        #[arg(long)]
        harness: Option<String>,
        /// Model passed to the backend
        #[arg(long)]
        model: Option<String>,
        /// Token budget for the run
        #[arg(long)]
        budget: Option<i64>,
        /// Attempts allowed per task
        #[arg(long)]
        max_per_task: Option<i64>,
        /// Attempts allowed across the run
        #[arg(long)]
        max_per_run: Option<i64>,
        /// Log uncommitted changes instead of stopping
        #[arg(long)]
        advisory: bool,
        #[command(flatten)]
        filter: FilterArgs,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Flags that take part in config resolution.
    fn overrides(&self) -> Overrides {
        match self {
            Commands::Run {
                harness,
                model,
                budget,
                max_per_task,
                max_per_run,
                advisory,
                ..
            } => Overrides {
                harness: harness.clone(),
                model: model.clone(),
                budget: *budget,
                max_per_task: *max_per_task,
                max_per_run: *max_per_run,
                advisory: *advisory,
                ..Overrides::default()
            },
            Commands::GitCheck { advisory } => Overrides {
                advisory: *advisory,
                ..Overrides::default()
            },
            _ => Overrides::default(),
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over the default level.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Execute the `drover init` command: write the project config.
fn cmd_init(root: &std::path::Path, force: bool) -> anyhow::Result<()> {
    let report = config::init_project(root, force)?;

    println!("Config written to {}", report.config_path.display());
    if report.created_backlog {
        println!("Empty backlog written to {}", report.tasks_path.display());
    }
    println!();
    println!("Next: add tasks to the backlog, commit .drover/, then run `drover run`.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let root = match &cli.project {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to read the current directory")?,
    };

    if let Commands::Init { force } = cli.command {
        init_tracing(cli.debug);
        return cmd_init(&root, force);
    }

    let mut overrides = cli.command.overrides();
    overrides.debug = cli.debug;
    overrides.tasks = cli.tasks.clone();
    let resolved = DroverConfig::resolve(&root, &overrides);

    init_tracing(resolved.as_ref().map_or(cli.debug, |c| c.run.debug));
    let resolved = resolved?;
    let store = JsonFileTaskStore::new(&resolved.tasks_path);

    let code = match cli.command {
        Commands::Init { .. } => 0,
        Commands::List {
            filter,
            status,
            kind,
            priority,
            json,
        } => {
            let query = list_cmd::ListQuery {
                filter: TaskFilter {
                    status,
                    ..filter.to_filter()
                },
                kind,
                priority,
            };
            list_cmd::run_list(&store, &query, json).await?;
            0
        }
        Commands::Ready { filter, json } => {
            ready_cmd::run_ready(&store, &filter.to_filter(), json).await?;
            0
        }
        Commands::Next { filter, json } => {
            ready_cmd::run_next(&store, &filter.to_filter(), json).await?;
            0
        }
        Commands::Approve { gate_id } => {
            gate_cmd::run_approve(&store, &gate_id).await?;
            0
        }
        Commands::Gate { task_id } => {
            gate_cmd::run_gate(&store, &task_id).await?;
            0
        }
        Commands::Harnesses { json } => {
            harnesses_cmd::run_harnesses(json)?;
            0
        }
        Commands::GitCheck { .. } => {
            git_check_cmd::run_git_check(&resolved.project_root, resolved.run.git.policy)?
        }
        Commands::Run { filter, json, .. } => {
            run_cmd::run_drover(&resolved, filter.to_filter(), json).await?
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
