//! shuttle CLI
//!
//! Queue commands (`add`, `list`, `edit`, ...) open the data dir, apply one
//! intent and flush. `run` starts the orchestrator and reads approval /
//! cancel commands from stdin until Ctrl-C (or until idle with `--until-idle`).
//!
//! One process owns a data dir at a time. While `run` holds it, `list` and
//! `show` read the snapshot directly; other changes go through the `run`
//! console (`add`, `cancel`, `approve`, `reject`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use shuttle_core::app::{AppBuilder, BuildError, LockError, QueueCounts, ShuttleConfig, TaskView};
use shuttle_core::domain::{AgentBackend, Priority, QueueEvent, TaskEdit, TaskId, TaskSpec};
use shuttle_core::queue::{CancelOutcome, QueueState, QueueStore, TaskRecord};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

// ========================================
// CLI 定義
// ========================================

/// Headless task queue for AI coding agents.
#[derive(Parser)]
#[command(name = "shuttle", version)]
struct Cli {
    /// YAML config file.
    #[arg(long, global = true, env = "SHUTTLE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the config.
    #[arg(long, global = true, env = "SHUTTLE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a task.
    Add(AddArgs),
    /// List tasks in queue order.
    List,
    /// Show one task.
    Show { id: TaskId },
    /// Edit a pending task.
    Edit(EditArgs),
    /// Remove a pending task.
    Remove { id: TaskId },
    /// Move a pending task to a queue position (0 = front).
    Move { id: TaskId, position: usize },
    /// Requeue a failed task.
    Retry { id: TaskId },
    /// Cancel a pending task.
    Cancel { id: TaskId },
    /// Drop completed, failed and cancelled tasks.
    Clear,
    /// Execute the queue.
    Run {
        /// Exit once nothing is pending.
        #[arg(long)]
        until_idle: bool,
    },
}

impl Command {
    /// Safe to serve from the snapshot while another process owns the data dir.
    fn is_read_only(&self) -> bool {
        matches!(self, Command::List | Command::Show { .. })
    }
}

#[derive(Args)]
struct AddArgs {
    /// Prompt sent to the agent.
    prompt: String,
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long, short = 'b', default_value = "claude")]
    backend: AgentBackend,
    /// Working directory (default: current directory).
    #[arg(long, short = 'C')]
    dir: Option<PathBuf>,
    #[arg(long, short = 'p', default_value = "normal")]
    priority: Priority,
    #[arg(long)]
    model: Option<String>,
    /// Backend mode (permission mode, sandbox, ...).
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    max_retries: Option<u32>,
}

#[derive(Args)]
struct EditArgs {
    id: TaskId,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    priority: Option<Priority>,
}

// ========================================
// エントリポイント
// ========================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("shuttle: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type CliResult = Result<(), BoxError>;

async fn execute(cli: Cli) -> CliResult {
    let mut config = ShuttleConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let json = cli.json;

    let app = match AppBuilder::new(config.clone()).build().await {
        Ok(app) => app,
        Err(BuildError::Locked(LockError::Held(dir))) if cli.command.is_read_only() => {
            tracing::debug!(data_dir = %dir.display(), "data dir in use; reading the snapshot");
            let tasks = read_snapshot(&config)?;
            return match cli.command {
                Command::Show { id } => print_task(&find(&tasks, id)?, json),
                _ => print_list(&tasks, json),
            };
        }
        Err(BuildError::Locked(e)) => {
            return Err(format!("{e}; use the console of the running `shuttle run` instead").into());
        }
        Err(e) => return Err(e.into()),
    };
    let state = app.state();

    match cli.command {
        Command::Add(args) => {
            let dir = match args.dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let mut spec = TaskSpec::new(args.title, args.prompt, dir, args.backend)
                .with_priority(args.priority);
            spec.model = args.model;
            spec.mode = args.mode;
            spec.max_retries = args.max_retries;
            let id = state.enqueue(spec).await?;
            println!("{id}");
        }
        Command::List => print_list(&state.list().await, json)?,
        Command::Show { id } => {
            let task = state
                .get(id)
                .await
                .ok_or_else(|| format!("task {id} not found"))?;
            print_task(&task, json)?;
        }
        Command::Edit(args) => {
            state
                .edit(
                    args.id,
                    TaskEdit {
                        title: args.title,
                        prompt: args.prompt,
                        priority: args.priority,
                    },
                )
                .await?;
        }
        Command::Remove { id } => state.remove(id).await?,
        Command::Move { id, position } => state.move_to(id, position).await?,
        Command::Retry { id } => state.retry(id).await?,
        Command::Cancel { id } => {
            if state.cancel(id).await? == CancelOutcome::StopRequested {
                println!("stop requested for {id}");
            }
        }
        Command::Clear => {
            let removed = state.clear_finished().await;
            println!("removed {removed} finished task(s)");
        }
        Command::Run { until_idle } => {
            let shutdown = CancellationToken::new();
            let console = tokio::spawn(console(Arc::clone(&state), shutdown.clone()));
            let signal = tokio::spawn(stop_on_ctrl_c(shutdown.clone()));

            let result = if until_idle {
                app.run_until_idle(shutdown.clone()).await
            } else {
                app.run(shutdown.clone()).await
            };
            shutdown.cancel();
            signal.abort();
            console.abort();
            result?;
            // The orchestrator flushed before the data dir was released.
            return Ok(());
        }
    }

    state.flush().await?;
    Ok(())
}

/// Snapshot on disk, without recovery or writes.
fn read_snapshot(config: &ShuttleConfig) -> Result<Vec<TaskRecord>, BoxError> {
    let store = QueueStore::new(config.snapshot_path(), config.save_debounce);
    Ok(store.peek()?.tasks)
}

fn find(tasks: &[TaskRecord], id: TaskId) -> Result<TaskRecord, BoxError> {
    tasks
        .iter()
        .find(|t| t.id == id)
        .cloned()
        .ok_or_else(|| format!("task {id} not found").into())
}

fn print_list(tasks: &[TaskRecord], json: bool) -> CliResult {
    let views: Vec<TaskView> = tasks.iter().map(TaskView::from_record).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    for view in &views {
        println!("{}", list_line(view));
    }
    let counts = QueueCounts::from_tasks(tasks);
    println!(
        "-- {} pending, {} running, {} completed, {} failed, {} cancelled",
        counts.pending, counts.running, counts.completed, counts.failed, counts.cancelled
    );
    Ok(())
}

fn print_task(task: &TaskRecord, json: bool) -> CliResult {
    let view = TaskView::from_record(task);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }
    println!("{}", list_line(&view));
    println!("  prompt:  {}", task.prompt);
    println!("  dir:     {}", task.working_dir.display());
    if let Some(model) = task.resolved_model.as_ref().or(task.model.as_ref()) {
        println!("  model:   {model}");
    }
    if let Some(session) = &task.session_id {
        println!("  session: {session}");
    }
    if let Some(note) = &task.interrupted_note {
        println!("  note:    {note}");
    }
    if let Some(path) = &view.log_artifact_path {
        println!("  log:     {}", path.display());
    }
    Ok(())
}

fn list_line(view: &TaskView) -> String {
    format!(
        "{}  {:<9} {:<6} {:<6} {}  [{}]",
        view.id,
        view.status.to_string(),
        view.priority.to_string(),
        view.backend.to_string(),
        view.title,
        view.summary
    )
}

async fn stop_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("ctrl-c received; stopping after the current task is requeued");
            shutdown.cancel();
        }
        Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
    }
}

/// Interactive control while `run` is active.
///
/// Commands: `add <prompt>`, `approve <id>`, `reject <id>`, `cancel <id>`, `list`.
/// `add` queues a normal-priority claude task in the current directory.
async fn console(state: Arc<QueueState>, shutdown: CancellationToken) {
    let mut events = state.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(QueueEvent::ApprovalRequested { task, reason }) => {
                    println!("!! {task} needs approval: {reason}");
                    println!("   type `approve {task}` or `reject {task}`");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "console lagged behind queue events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = console_command(&state, line.trim()).await {
                        println!("error: {e}");
                    }
                }
                // stdin closed: keep running without the console.
                Ok(None) => {
                    shutdown.cancelled().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "console input failed");
                    shutdown.cancelled().await;
                    break;
                }
            },
        }
    }
}

async fn console_command(state: &QueueState, line: &str) -> CliResult {
    let Some(verb) = line.split_whitespace().next() else {
        return Ok(());
    };
    let id = || -> Result<TaskId, BoxError> {
        let raw = line.split_whitespace().nth(1).ok_or("missing task id")?;
        Ok(raw.parse::<TaskId>()?)
    };
    match verb {
        "add" => {
            let prompt = line[verb.len()..].trim();
            if prompt.is_empty() {
                return Err("missing prompt".into());
            }
            let spec = TaskSpec::new("", prompt, std::env::current_dir()?, AgentBackend::Claude);
            println!("queued {}", state.enqueue(spec).await?);
        }
        "approve" => state.approve(id()?).await?,
        "reject" => state.reject(id()?).await?,
        "cancel" => {
            let id = id()?;
            match state.cancel(id).await? {
                CancelOutcome::Cancelled => println!("cancelled {id}"),
                CancelOutcome::StopRequested => println!("stopping {id}"),
            }
        }
        "list" => {
            for task in state.list().await {
                println!("{}", list_line(&TaskView::from_record(&task)));
            }
        }
        other => println!("unknown command '{other}' (add|approve|reject|cancel|list)"),
    }
    Ok(())
}
