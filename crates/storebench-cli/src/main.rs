//! Storebench CLI
//!
//! Host side of the benchmark:
//! - `list`: registered backends
//! - `run`: send commands for one backend and print the results
//! - `matrix`: full lifecycle on every backend, one after the other
//! - `serve`: JSON-lines worker protocol over stdin/stdout

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use storebench_harness::{
    ensure_persistent_storage, event_channel, orchestrator_from_config, serve_lines,
    BackendRegistry, Command, HarnessConfig, ResultRegistry, Task, Worker, WorkerEvent,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "storebench")]
#[command(
    author,
    version,
    about = "Storebench: embedded storage engine benchmark harness"
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand. They override values from `--config`.
#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root directory for backend storage
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Sections inserted per load
    #[arg(long, global = true)]
    sections: Option<usize>,
    /// Search target (default: random 500-character string)
    #[arg(long, global = true)]
    needle: Option<String>,
    /// Value written by the update phase (default: the needle)
    #[arg(long, global = true)]
    replacement: Option<String>,
    /// Seed for generated data
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Per-phase timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered backends
    List,

    /// Send one or more commands to a single backend
    Run {
        /// Backend registry key
        #[arg(long)]
        backend: String,
        /// Task to run; repeat to queue several (default: launch)
        #[arg(long = "task", value_enum)]
        tasks: Vec<TaskArg>,
    },

    /// Launch every backend in turn and print the result table
    Matrix {
        /// Comma-separated backend keys (default: all)
        #[arg(long, value_delimiter = ',')]
        backends: Vec<String>,
        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the worker protocol as JSON lines on stdin/stdout
    Serve,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TaskArg {
    #[value(name = "setUp")]
    SetUp,
    #[value(name = "execute")]
    Execute,
    #[value(name = "searchInDatabase")]
    SearchInDatabase,
    #[value(name = "updateNinetyPercent")]
    UpdateNinetyPercent,
    #[value(name = "launch")]
    Launch,
    #[value(name = "release")]
    Release,
}

impl From<TaskArg> for Task {
    fn from(arg: TaskArg) -> Self {
        match arg {
            TaskArg::SetUp => Task::SetUp,
            TaskArg::Execute => Task::Execute,
            TaskArg::SearchInDatabase => Task::SearchInDatabase,
            TaskArg::UpdateNinetyPercent => Task::UpdateNinetyPercent,
            TaskArg::Launch => Task::Launch,
            TaskArg::Release => Task::Release,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    let config = load_config(&cli.common)?;

    match cli.command {
        Commands::List => {
            for key in BackendRegistry::with_defaults().keys() {
                println!("{key}");
            }
            Ok(())
        }
        Commands::Run { backend, tasks } => {
            check_backends(std::slice::from_ref(&backend))?;
            let tasks = if tasks.is_empty() {
                vec![TaskArg::Launch]
            } else {
                tasks
            };
            let commands = tasks
                .into_iter()
                .map(|task| Command::new(task.into(), backend.clone()))
                .collect();
            let report = drive(&config, commands, vec![backend])?;
            print!("{}", report.render_table());
            finish(&report)
        }
        Commands::Matrix { backends, json } => {
            let backends = if backends.is_empty() {
                BackendRegistry::with_defaults()
                    .keys()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            } else {
                backends
            };
            check_backends(&backends)?;
            let commands = backends.iter().map(Command::launch).collect();
            let report = drive(&config, commands, backends)?;
            if json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report.render_table());
            }
            finish(&report)
        }
        Commands::Serve => {
            ensure_persistent_storage(&config.data_dir)?;
            let orchestrator = orchestrator_from_config(&config);
            info!(data_dir = %config.data_dir.display(), "serving worker protocol on stdin/stdout");
            serve_lines(std::io::stdin().lock(), std::io::stdout(), orchestrator)
                .context("worker transport failed")
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_config(args: &CommonArgs) -> Result<HarnessConfig> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(sections) = args.sections {
        config.section_count = sections;
    }
    if let Some(needle) = &args.needle {
        config.needle = Some(needle.clone());
    }
    if let Some(replacement) = &args.replacement {
        config.replacement = Some(replacement.clone());
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(secs) = args.timeout_secs {
        config.phase_timeout_secs = secs;
    }
    config.validate()?;
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn check_backends(backends: &[String]) -> Result<()> {
    let registry = BackendRegistry::with_defaults();
    for backend in backends {
        if !registry.contains(backend) {
            bail!(
                "unknown backend `{backend}` (available: {})",
                registry.keys().join(", ")
            );
        }
    }
    Ok(())
}

/// Post `commands` to a fresh worker and collect every event it reports.
fn drive(config: &HarnessConfig, commands: Vec<Command>, backends: Vec<String>) -> Result<ResultRegistry> {
    ensure_persistent_storage(&config.data_dir)?;

    let orchestrator = orchestrator_from_config(config);
    let (sink, mut events) = event_channel();
    let mut handle = Worker::spawn(orchestrator, Arc::new(sink))?;
    info!(
        commands = commands.len(),
        sections = config.section_count,
        data_dir = %config.data_dir.display(),
        "posting commands"
    );
    for command in commands {
        handle.post(command)?;
    }
    handle.close();

    let mut report = ResultRegistry::new(config.section_count, backends);
    let mut received = 0usize;
    while let Some(event) = events.blocking_recv() {
        print_event(&event);
        report.apply(&event);
        received += 1;
    }
    handle.shutdown()?;
    info!(events = received, "worker finished");
    Ok(report)
}

fn print_event(event: &WorkerEvent) {
    match event {
        WorkerEvent::PhaseFailed {
            phase,
            database,
            error,
            timed_out,
        } => {
            let tag = if *timed_out { "timeout" } else { "failed" };
            eprintln!(
                "{} {} {}: {}",
                tag.red().bold(),
                database.bold(),
                phase,
                error
            );
        }
        _ => {
            let kind = event.kind().map(|k| k.as_str()).unwrap_or_default();
            let ms = event.total_time().map(|t| t.as_f64()).unwrap_or_default();
            eprintln!(
                "{} {} {} {:.1} ms",
                "ok".green().bold(),
                event.database().bold(),
                kind,
                ms
            );
        }
    }
}

fn finish(report: &ResultRegistry) -> Result<()> {
    let failures = report.failures();
    if failures.is_empty() {
        return Ok(());
    }
    for (kind, backend, message) in &failures {
        error!(backend = %backend, result = kind.as_str(), "{message}");
    }
    bail!("{} result(s) failed", failures.len())
}
