// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `meow` - a thin entry point driving the engine end to end: bake a
//! template into a run, schedule it, and let agents/operators talk to it
//! over its control socket.

mod error;
mod orchestrate;
mod project;
mod vars;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use error::ExitCode;
use meow_core::{EventFilter, JsonValue, RunId};
use meow_ipc::{IpcClient, Request, Response};
use meow_storage::{FsRunStore, ListFilter, RunStore};

#[derive(Parser)]
#[command(name = "meow", version, about = "A minimal multi-agent workflow orchestrator")]
struct Cli {
    /// Change to <dir> before doing anything; project state lives under
    /// `<dir>/.meow`.
    #[arg(short = 'C', global = true, value_name = "DIR")]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bake a template and run it to completion in the foreground.
    Run {
        /// Path to a YAML template file.
        template: PathBuf,
        /// Workflow name within the template.
        workflow: String,
        /// Template variables (repeatable): `--var key=value`.
        #[arg(long = "var", value_parser = vars::parse_key_value)]
        var: Vec<(String, String)>,
    },
    /// Reload a persisted run and continue it to completion.
    Resume {
        run_id: String,
    },
    /// Bake a template and run it detached from the invoking terminal.
    Daemon {
        template: PathBuf,
        workflow: String,
        #[arg(long = "var", value_parser = vars::parse_key_value)]
        var: Vec<(String, String)>,
    },
    /// Show one run's detail, or list every run (active and orphaned).
    Status {
        run_id: Option<String>,
    },
    /// Cooperatively cancel a running workflow.
    Stop {
        run_id: String,
    },
    /// Approve or reject an approval-gate step.
    Approve {
        run_id: String,
        gate: String,
        /// `true`/`false`.
        approved: bool,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Emit a custom event to a running workflow.
    Event {
        run_id: String,
        event_type: String,
        /// JSON object payload; defaults to `{}`.
        data: Option<String>,
    },
    /// Block until a matching event is observed or a timeout elapses.
    Await {
        run_id: String,
        event_type: String,
        #[arg(long = "filter", value_parser = vars::parse_key_value)]
        filter: Vec<(String, String)>,
        #[arg(long = "timeout-ms", default_value_t = 30_000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        let code = error::exit_code_for(&e);
        eprintln!("Error: {}", error::format_error(&e));
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("reading current directory")?;
    let start_dir = match &cli.directory {
        Some(dir) => std::fs::canonicalize(dir)
            .with_context(|| format!("cannot change to directory '{}'", dir.display()))?,
        None => cwd,
    };
    let project_root = project::find_project_root(&start_dir);
    let store = FsRunStore::new(project_root.clone());

    match cli.command {
        Commands::Run { template, workflow, var } => {
            cmd_run(&project_root, &store, template, workflow, collect_vars(var)).await
        }
        Commands::Resume { run_id } => cmd_resume(&project_root, &store, RunId::new(run_id)).await,
        Commands::Daemon { template, workflow, var } => {
            cmd_daemon(&project_root, &store, template, workflow, collect_vars(var)).await
        }
        Commands::Status { run_id } => cmd_status(&store, run_id.map(RunId::new)),
        Commands::Stop { run_id } => cmd_stop(&project_root, RunId::new(run_id)).await,
        Commands::Approve {
            run_id,
            gate,
            approved,
            notes,
            reason,
        } => cmd_approve(&project_root, RunId::new(run_id), gate, approved, notes, reason).await,
        Commands::Event {
            run_id,
            event_type,
            data,
        } => cmd_event(&project_root, RunId::new(run_id), event_type, data).await,
        Commands::Await {
            run_id,
            event_type,
            filter,
            timeout_ms,
        } => cmd_await(&project_root, RunId::new(run_id), event_type, filter, timeout_ms).await,
    }
}

fn collect_vars(pairs: Vec<(String, String)>) -> HashMap<String, JsonValue> {
    pairs
        .into_iter()
        .map(|(k, v)| (k, vars::coerce_json(&v)))
        .collect()
}

async fn cmd_run(
    project_root: &std::path::Path,
    store: &FsRunStore,
    template: PathBuf,
    workflow: String,
    vars: HashMap<String, JsonValue>,
) -> Result<()> {
    let module = orchestrate::load_module(&template)?;
    let run = orchestrate::create_run(store, &template, &workflow, &module, vars)?;
    let run_id = run.id.clone();
    let lock = store.acquire_lock(&run_id).context("locking new run")?;

    println!("{run_id}");
    let result = orchestrate::drive_to_completion(
        project_root,
        run,
        lock,
        module,
        std::sync::Arc::new(store.clone()),
    )
    .await?;
    exit_for_run_status(&result)
}

async fn cmd_resume(
    project_root: &std::path::Path,
    store: &FsRunStore,
    run_id: RunId,
) -> Result<()> {
    let run = store
        .get(&run_id)
        .with_context(|| format!("loading run '{run_id}'"))?;
    let template_path = PathBuf::from(&run.template_ref);
    let module = orchestrate::load_module(&template_path)?;
    let lock = store
        .acquire_lock(&run_id)
        .with_context(|| format!("locking run '{run_id}' (already active?)"))?;

    let result =
        orchestrate::drive_to_completion(project_root, run, lock, module, std::sync::Arc::new(store.clone()))
            .await?;
    exit_for_run_status(&result)
}

async fn cmd_daemon(
    project_root: &std::path::Path,
    store: &FsRunStore,
    template: PathBuf,
    workflow: String,
    vars: HashMap<String, JsonValue>,
) -> Result<()> {
    let module = orchestrate::load_module(&template)?;
    let mut run = orchestrate::create_run(store, &template, &workflow, &module, vars)?;
    let run_id = run.id.clone();

    let logs_dir = project_root.join(".meow").join("logs");
    std::fs::create_dir_all(&logs_dir).context("creating logs directory")?;
    let log_path = logs_dir.join(format!("{run_id}.log"));
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("creating log file '{}'", log_path.display()))?;
    let log_file_err = log_file.try_clone().context("cloning log file handle")?;

    let exe = std::env::current_exe().context("resolving current executable")?;
    let child = std::process::Command::new(exe)
        .arg("-C")
        .arg(project_root)
        .arg("resume")
        .arg(run_id.as_str())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::from(log_file))
        .stderr(std::process::Stdio::from(log_file_err))
        .spawn()
        .context("spawning detached orchestrator")?;

    run.orchestrator_pid = child.id();
    store.save(&run).context("recording orchestrator pid")?;

    println!("{run_id}");
    Ok(())
}

fn cmd_status(store: &FsRunStore, run_id: Option<RunId>) -> Result<()> {
    match run_id {
        Some(id) => {
            let run = store.get(&id).with_context(|| format!("loading run '{id}'"))?;
            let locked = store.is_locked(&id).unwrap_or(false);
            println!(
                "{}\t{:?}\t{}\t{}/{} steps terminal",
                run.id,
                run.status,
                if locked { "active" } else { "orphaned-if-running" },
                run.steps.iter().filter(|s| s.status.is_terminal()).count(),
                run.steps.len(),
            );
        }
        None => {
            for run in store.list(&ListFilter::default())? {
                let locked = store.is_locked(&run.id).unwrap_or(false);
                let orphaned = run.status == meow_core::RunStatus::Running && !locked;
                println!(
                    "{}\t{:?}\t{}",
                    run.id,
                    run.status,
                    if orphaned { "orphaned" } else if locked { "active" } else { "-" },
                );
            }
        }
    }
    Ok(())
}

async fn cmd_stop(project_root: &std::path::Path, run_id: RunId) -> Result<()> {
    let client = connect(project_root, &run_id)?;
    let response = client
        .send(&Request::Cancel {
            workflow: run_id.clone(),
        })
        .await
        .with_context(|| format!("sending cancel to run '{run_id}'"))?;
    match response {
        Response::Ack => Ok(()),
        Response::Error { message } => anyhow::bail!("orchestrator rejected cancel: {message}"),
        other => anyhow::bail!("unexpected response to cancel: {other:?}"),
    }
}

/// Submit an approval decision. This is the CLI surface for an external
/// approver and is a plain success/error command — the 0/1/2 exit-code
/// discipline (spec.md §6) belongs to the *waiter* side, satisfied by
/// `await <run> gate-approved --filter gate=<gate>`.
async fn cmd_approve(
    project_root: &std::path::Path,
    run_id: RunId,
    gate: String,
    approved: bool,
    notes: Option<String>,
    reason: Option<String>,
) -> Result<()> {
    let client = connect(project_root, &run_id)?;
    let response = client
        .send(&Request::Approval {
            workflow: run_id.clone(),
            gate,
            approved,
            notes,
            reason,
        })
        .await
        .context("sending approval")?;
    match response {
        Response::Ack => Ok(()),
        Response::Error { message } => anyhow::bail!("orchestrator rejected approval: {message}"),
        other => anyhow::bail!("unexpected response to approval: {other:?}"),
    }
}

async fn cmd_event(
    project_root: &std::path::Path,
    run_id: RunId,
    event_type: String,
    data: Option<String>,
) -> Result<()> {
    let data = match data {
        Some(raw) => serde_json::from_str(&raw).context("parsing event data as JSON")?,
        None => JsonValue::Object(Default::default()),
    };
    let client = connect(project_root, &run_id)?;
    let response = client
        .send(&Request::Event { event_type, data })
        .await
        .context("sending event")?;
    match response {
        Response::Ack => Ok(()),
        Response::Error { message } => anyhow::bail!("orchestrator rejected event: {message}"),
        other => anyhow::bail!("unexpected response to event: {other:?}"),
    }
}

async fn cmd_await(
    project_root: &std::path::Path,
    run_id: RunId,
    event_type: String,
    filter_pairs: Vec<(String, String)>,
    timeout_ms: u64,
) -> Result<()> {
    let mut filter = EventFilter::new();
    for (k, v) in filter_pairs {
        filter = filter.with(k, vars::coerce_json(&v));
    }

    let client = match connect(project_root, &run_id) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return Err(ExitCode(2).into());
        }
    };
    let response = client
        .with_timeout(Duration::from_millis(timeout_ms) + Duration::from_secs(1))
        .send(&Request::AwaitEvent {
            event_type,
            filter,
            timeout_ms,
        })
        .await;

    match response {
        Ok(Response::Event { event }) => {
            println!("{}", serde_json::to_string(&event).unwrap_or_default());
            Ok(())
        }
        Ok(Response::Timeout) => Err(ExitCode(1).into()),
        Ok(Response::Error { message }) => {
            eprintln!("orchestrator error: {message}");
            Err(ExitCode(2).into())
        }
        Ok(other) => {
            eprintln!("unexpected response to await-event: {other:?}");
            Err(ExitCode(2).into())
        }
        Err(e) => {
            eprintln!("error awaiting event: {e}");
            Err(ExitCode(2).into())
        }
    }
}

fn connect(project_root: &std::path::Path, run_id: &RunId) -> Result<IpcClient> {
    let path = orchestrate::socket_path(project_root, run_id);
    if !path.exists() {
        anyhow::bail!("run '{run_id}' has no active control socket at '{}'", path.display());
    }
    Ok(IpcClient::new(path))
}

fn exit_for_run_status(run: &meow_core::Run) -> Result<()> {
    if run.status == meow_core::RunStatus::Failed {
        Err(ExitCode(1).into())
    } else {
        Ok(())
    }
}
