//! Command-line entry point for the undercity orchestrator.
//!
//! A thin dispatcher over `undercity-core`: every subcommand builds a
//! `UndercityConfig` and an `Orchestrator`/`TaskBoard` and hands off
//! immediately. No orchestration logic lives here (spec.md §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod model_client;

/// undercity: a multi-agent code-modification orchestrator.
///
/// Submits objectives as Tasks, routes each to a model tier, drives a
/// Worker through baseline verification, an agent loop, and local
/// verification, then serializes successful changes through a merge queue
/// onto trunk.
///
/// QUICK START:
///
///   undercity orchestrate "fix the flaky retry test"
///   undercity status
///   undercity work --count 5
#[derive(Parser)]
#[command(name = "undercity")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the repository root (containing `.git`). Defaults to cwd.
    #[arg(long, global = true, env = "UNDERCITY_REPO", default_value = ".")]
    repo: PathBuf,

    /// Command (and arguments) invoked for every model query, e.g.
    /// `claude --print --output-format stream-json`. Required by
    /// `orchestrate` and `work`; ignored by read-only subcommands.
    #[arg(long, global = true, env = "UNDERCITY_MODEL_CMD")]
    model_cmd: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an objective as a Task and run the orchestrator until it
    /// (and anything it decomposes into) reaches a terminal state.
    Orchestrate(commands::orchestrate::Args),

    /// Drain the backlog serially, optionally capped at `--count` Workers.
    Work(commands::work::Args),

    /// Print a one-line summary of the Task Board and Merge Queue.
    Status,

    /// List every tracked Task.
    Tasks,

    /// Parse a markdown plan file into Tasks.
    ImportPlan(commands::import_plan::Args),

    /// Scan recent trunk commits and auto-complete Tasks whose objective
    /// matches a commit message.
    Reconcile(commands::reconcile::Args),
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("UNDERCITY_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Orchestrate(args) => commands::orchestrate::run(&cli.repo, cli.model_cmd.as_deref(), args),
        Commands::Work(args) => commands::work::run(&cli.repo, cli.model_cmd.as_deref(), args),
        Commands::Status => commands::status::run(&cli.repo),
        Commands::Tasks => commands::tasks::run(&cli.repo),
        Commands::ImportPlan(args) => commands::import_plan::run(&cli.repo, args),
        Commands::Reconcile(args) => commands::reconcile::run(&cli.repo, args),
    };

    match outcome {
        Ok(code) => code.into(),
        Err(e) => {
            eprintln!("error: {e:#}");
            commands::ExitCode::ConfigError.into()
        }
    }
}
