//! Self-building coordinator CLI.
//!
//! State lives under `.autobuild/` in the project root. Every command builds
//! the store, approval gate, dispatcher and loop it needs and passes them down
//! by reference.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;

use autobuild::build_loop::{BuildLoop, LoopConfig, LoopStop};
use autobuild::core::context::TaskContext;
use autobuild::core::types::{BuildStep, SystemCapability};
use autobuild::dispatch::{DispatchConfig, TaskDispatcher};
use autobuild::exit_codes;
use autobuild::io::approvals::ApprovalGate;
use autobuild::io::config::{AutobuildPaths, BuildConfig, load_config, write_config};
use autobuild::io::docs::{HttpDocSource, Researcher};
use autobuild::io::executor::CommandExecutor;
use autobuild::io::lock::{FileLock, lock_state};
use autobuild::io::state_store::StateStore;
use autobuild::io::validator::CommandValidator;
use autobuild::io::writer::GuardedWriter;
use autobuild::logging;

#[derive(Parser)]
#[command(
    name = "autobuild",
    version,
    about = "Self-building coordinator: reconcile a project against its capability manifest"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.autobuild/config.toml` with defaults if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the reconciliation loop until fixpoint or the iteration ceiling.
    Run,
    /// Print capabilities, gaps and recent build steps as JSON.
    Status {
        /// Number of recent build steps to show.
        #[arg(long, default_value_t = 10)]
        steps: usize,
    },
    /// Dispatch a single task and print its output.
    Dispatch {
        task: String,
        /// Starting depth.
        #[arg(long, default_value_t = 0)]
        depth: u32,
        /// Print the full output with metadata as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Review writes to protected paths.
    Approvals {
        #[command(subcommand)]
        command: ApprovalsCommand,
    },
}

#[derive(Subcommand)]
enum ApprovalsCommand {
    /// List pending approvals.
    List {
        /// Include approved and denied records.
        #[arg(long)]
        all: bool,
    },
    Approve {
        id: String,
    },
    Deny {
        id: String,
    },
    /// Perform the write of an approved request.
    Apply {
        id: String,
    },
    /// Remove approved and denied records.
    Clear,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = AutobuildPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Run => cmd_run(&paths),
        Command::Status { steps } => cmd_status(&paths, steps),
        Command::Dispatch { task, depth, json } => cmd_dispatch(&paths, &task, depth, json),
        Command::Approvals { command } => cmd_approvals(&paths, command),
    }
}

fn cmd_init(paths: &AutobuildPaths, force: bool) -> Result<i32> {
    for dir in [&paths.state_dir, &paths.docs_cache_dir, &paths.logs_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    if force || !paths.config_path.exists() {
        write_config(&paths.config_path, &BuildConfig::default())?;
        println!("wrote {}", paths.config_path.display());
    }
    Ok(exit_codes::OK)
}

/// Open the store for writing. Hold the returned lock for as long as the store.
fn open_store(paths: &AutobuildPaths, cfg: &BuildConfig) -> Result<(FileLock, StateStore)> {
    let lock = lock_state(&paths.state_lock_path)?;
    let store = StateStore::load_with_ttl(&paths.state_path, cfg.cache_ttl_secs)
        .with_context(|| format!("load {}", paths.state_path.display()))?;
    Ok((lock, store))
}

fn researcher(paths: &AutobuildPaths, cfg: &BuildConfig) -> Researcher {
    let source = HttpDocSource::new(
        &paths.docs_cache_dir,
        Duration::from_secs(cfg.research.timeout_secs),
    );
    Researcher::new(Box::new(source), cfg.research.max_snippets)
}

fn cmd_run(paths: &AutobuildPaths) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let executor = CommandExecutor::from_config(&cfg, &paths.root)?;
    let (_state_lock, store) = open_store(paths, &cfg)?;
    let gate = ApprovalGate::open(&paths.approvals_path)?;
    let researcher = researcher(paths, &cfg);
    let dispatcher = TaskDispatcher::new(
        &store,
        &executor,
        &executor,
        DispatchConfig::from_build_config(&cfg, &paths.root),
    )
    .with_researcher(&researcher);
    let writer = GuardedWriter::new(&paths.root, &store, &gate, cfg.protection.clone());
    let validator = CommandValidator::from_config(&cfg);
    let build = BuildLoop::new(
        &paths.root,
        &store,
        &dispatcher,
        &writer,
        &validator,
        LoopConfig::from_build_config(&cfg, paths),
    );

    let outcome = build.run()?;
    println!(
        "{} after {} iteration(s)",
        match outcome.stop {
            LoopStop::Fixpoint => "complete",
            LoopStop::MaxIterations => "iteration ceiling reached",
            LoopStop::Stopped => "stopped",
        },
        outcome.iterations
    );
    if !outcome.remaining.is_empty() {
        println!("remaining: {}", outcome.remaining.join(", "));
    }
    Ok(match outcome.stop {
        LoopStop::MaxIterations => exit_codes::INCOMPLETE,
        LoopStop::Fixpoint | LoopStop::Stopped => exit_codes::OK,
    })
}

#[derive(Serialize)]
struct StatusReport {
    capabilities: Vec<SystemCapability>,
    gaps: Vec<String>,
    generated_files: Vec<String>,
    recent_steps: Vec<BuildStep>,
    pending_approvals: usize,
}

/// Gap names without touching the store.
fn missing_capabilities(root: &Path, capabilities: &[SystemCapability]) -> Vec<String> {
    capabilities
        .iter()
        .filter(|cap| match cap.file_path.as_deref() {
            Some(path) => !root.join(path).exists(),
            None => !cap.implemented,
        })
        .map(|cap| cap.name.clone())
        .collect()
}

/// Read-only: safe to run alongside a live `autobuild run`.
fn cmd_status(paths: &AutobuildPaths, steps: usize) -> Result<i32> {
    let state = StateStore::read_snapshot(&paths.state_path)
        .with_context(|| format!("read {}", paths.state_path.display()))?;
    let gate = ApprovalGate::open(&paths.approvals_path)?;
    let report = StatusReport {
        gaps: missing_capabilities(&paths.root, &state.capabilities),
        recent_steps: state.recent_build_steps(steps).to_vec(),
        capabilities: state.capabilities,
        generated_files: state.generated_files,
        pending_approvals: gate.get_pending().len(),
    };
    print_json(&report)?;
    Ok(exit_codes::OK)
}

fn cmd_dispatch(paths: &AutobuildPaths, task: &str, depth: u32, json: bool) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let executor = CommandExecutor::from_config(&cfg, &paths.root)?;
    let (_state_lock, store) = open_store(paths, &cfg)?;
    let researcher = researcher(paths, &cfg);
    let dispatcher = TaskDispatcher::new(
        &store,
        &executor,
        &executor,
        DispatchConfig::from_build_config(&cfg, &paths.root),
    )
    .with_researcher(&researcher);

    let output = dispatcher.run(task, &TaskContext::new(), depth)?;
    if json {
        print_json(&output)?;
    } else {
        println!("{}", output.output);
    }
    Ok(exit_codes::OK)
}

fn cmd_approvals(paths: &AutobuildPaths, command: ApprovalsCommand) -> Result<i32> {
    let gate = ApprovalGate::open(&paths.approvals_path)?;
    match command {
        ApprovalsCommand::List { all } => {
            let approvals = if all {
                gate.get_all()
            } else {
                gate.get_pending()
            };
            print_json(&approvals)?;
        }
        ApprovalsCommand::Approve { id } => {
            let approval = gate
                .approve(&id)?
                .ok_or_else(|| anyhow!("approval {id} is unknown or already resolved"))?;
            println!("approved {} ({})", approval.id, approval.file_path);
        }
        ApprovalsCommand::Deny { id } => {
            let approval = gate
                .deny(&id)?
                .ok_or_else(|| anyhow!("approval {id} is unknown or already resolved"))?;
            println!("denied {} ({})", approval.id, approval.file_path);
        }
        ApprovalsCommand::Apply { id } => {
            let cfg = load_config(&paths.config_path)?;
            let (_state_lock, store) = open_store(paths, &cfg)?;
            let writer = GuardedWriter::new(&paths.root, &store, &gate, cfg.protection.clone());
            print_json(&writer.apply_approved(&id)?)?;
        }
        ApprovalsCommand::Clear => {
            let removed = gate.clear_resolved()?;
            println!("removed {removed} resolved approval(s)");
        }
    }
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
