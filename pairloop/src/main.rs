//! Planner/Executor coordination CLI.
//!
//! Runs one Session per `pairloop run`: the Planner decomposes the goal, the
//! Executor carries out each work item, and the Planner validates the result.
//! Sessions are recorded under `.pairloop/sessions/` and lifecycle events are
//! appended to `.pairloop/events.jsonl`.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use pairloop::cancel::CancelToken;
use pairloop::coordinator::{Coordinator, SessionReport};
use pairloop::core::types::{Task, WorkItem};
use pairloop::exit_codes;
use pairloop::io::config::load_config;
use pairloop::io::executor::CliProcessExecutor;
use pairloop::io::init::{InitOptions, PairloopPaths, init_workspace};
use pairloop::io::ledger::{FsLedger, Ledger};
use pairloop::io::monitor::{JsonlMonitor, Monitor, TracingMonitor};
use pairloop::logging;

#[derive(Parser)]
#[command(
    name = "pairloop",
    version,
    about = "Coordinate a Planner and an Executor assistant toward one goal"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.pairloop/` with a default config.
    Init {
        /// Overwrite the existing config (sessions are kept).
        #[arg(short, long)]
        force: bool,
    },
    /// Run one Session toward a goal.
    Run {
        /// What the Session should accomplish.
        #[arg(short, long)]
        goal: String,
        /// Working directory for both roles (defaults to the current directory).
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Fail instead of degrading to single-role mode on escalation.
        #[arg(long)]
        no_fallback: bool,
        /// Override `policy.max_iterations`.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Skip planning and execute these work items in order.
        #[arg(long = "item")]
        items: Vec<String>,
    },
    /// Print a recorded Session as JSON.
    Show {
        session_id: Uuid,
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(force),
        Command::Run {
            goal,
            workdir,
            no_fallback,
            max_iterations,
            items,
        } => cmd_run(RunArgs {
            goal,
            workdir,
            no_fallback,
            max_iterations,
            items,
        }),
        Command::Show {
            session_id,
            workdir,
        } => cmd_show(session_id, workdir),
    }
}

fn cmd_init(force: bool) -> Result<i32> {
    let root = env::current_dir().context("resolve current directory")?;
    let paths = init_workspace(&root, &InitOptions { force })?;
    println!("initialized {}", paths.pairloop_dir.display());
    Ok(exit_codes::OK)
}

struct RunArgs {
    goal: String,
    workdir: Option<PathBuf>,
    no_fallback: bool,
    max_iterations: Option<u32>,
    items: Vec<String>,
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    if args.goal.trim().is_empty() {
        bail!("pairloop run: --goal must not be empty");
    }
    let root = resolve_root(args.workdir.as_deref())?;
    let paths = PairloopPaths::new(&root);

    let mut config = load_config(&paths.config_path)?;
    if args.no_fallback {
        config.policy.allow_fallback = false;
    }
    if let Some(max) = args.max_iterations {
        config.policy.max_iterations = max;
    }
    config.validate().context("invalid command-line overrides")?;

    let process = CliProcessExecutor::new(&config.process.command)?;
    let monitor: Arc<dyn Monitor> = match JsonlMonitor::open(&paths.events_path) {
        Ok(monitor) => Arc::new(monitor),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "event log unavailable, logging events instead");
            Arc::new(TracingMonitor)
        }
    };
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install Ctrl-C handler")?;

    let coordinator = Coordinator::from_config(process, FsLedger::new(&paths.sessions_dir), &config)
        .with_monitor(monitor)
        .with_cancel(cancel);
    let task = Task::new(args.goal, root);
    let report = if args.items.is_empty() {
        coordinator.run(task)
    } else {
        let items = args.items.into_iter().map(WorkItem::new).collect();
        coordinator.run_with_plan(task, items)
    };

    print_json(&RunSummary::from_report(&report))?;
    Ok(exit_codes::for_report(&report))
}

fn cmd_show(session_id: Uuid, workdir: Option<PathBuf>) -> Result<i32> {
    let root = resolve_root(workdir.as_deref())?;
    let paths = PairloopPaths::new(&root);
    let session = FsLedger::new(&paths.sessions_dir).load_session(session_id)?;
    print_json(&session)?;
    Ok(exit_codes::OK)
}

fn resolve_root(workdir: Option<&Path>) -> Result<PathBuf> {
    let dir = match workdir {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir().context("resolve current directory")?,
    };
    dir.canonicalize()
        .with_context(|| format!("resolve working directory {}", dir.display()))
}

/// Stdout summary of a finished run.
#[derive(Serialize)]
struct RunSummary {
    session_id: Uuid,
    status: String,
    iterations: usize,
    total_cost_usd: f64,
    total_duration_ms: u64,
    error_kind: Option<&'static str>,
    error: Option<String>,
    transient_failures: usize,
    incidents: Vec<String>,
}

impl RunSummary {
    fn from_report(report: &SessionReport) -> Self {
        let session = &report.session;
        Self {
            session_id: session.id(),
            status: session.status().to_string(),
            iterations: session.iterations().len(),
            total_cost_usd: session.total_cost_usd(),
            total_duration_ms: session.total_duration_ms(),
            error_kind: report.error.as_ref().map(|err| err.kind()),
            error: report.error.as_ref().map(ToString::to_string),
            transient_failures: report.transient_failures(),
            incidents: report.incidents.iter().map(ToString::to_string).collect(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
