use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use training_dispatch::config::DispatchConfig;
use training_dispatch::shard::shard;
use training_dispatch::shutdown::termination_token;
use training_dispatch::training::{Job, TaskSpec};
use training_dispatch::worker::Dispatcher;
use training_dispatch::TaskFailure;

/// How long to keep relaying output after the task process exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "training-dispatch")]
#[command(version)]
#[command(about = "Run training tasks as isolated, memory-limited processes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Dispatch one training task and wait for it to finish
    Run(RunArgs),

    /// Print the shard assigned to each identifier
    Shard {
        /// Number of shards
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        shards: u32,

        /// Identifiers to place
        #[arg(required = true, allow_negative_numbers = true)]
        ids: Vec<i64>,
    },
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Job ID (a random UUID when omitted)
    #[arg(long)]
    job_id: Option<String>,

    /// Working directory owned by the job
    #[arg(long)]
    job_dir: PathBuf,

    /// Name of the training task to run
    #[arg(long, short = 't')]
    task_name: String,

    /// Task parameter forwarded as `--key value` (repeatable, format: "key=value")
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Runtime binary used to run the task
    #[arg(long, default_value = "node")]
    executable: PathBuf,

    /// Leading argument for the runtime itself (repeatable)
    #[arg(long = "runtime-arg", allow_hyphen_values = true)]
    runtime_args: Vec<String>,

    /// Entry script placed before the task subcommand
    #[arg(long)]
    entry_point: Option<PathBuf>,

    /// Memory limit for the task process, in megabytes
    #[arg(long, default_value = "24000")]
    memory_limit_mb: u64,

    /// Runtime flag carrying the memory limit
    #[arg(long, default_value = "--max_old_space_size", allow_hyphen_values = true)]
    memory_flag: String,

    /// Send SIGKILL if the task is still alive this many seconds after SIGTERM
    #[arg(long)]
    kill_grace_secs: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct TaskReport {
    job_id: String,
    task: String,
    outcome: &'static str,
    reason: Option<String>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: i64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid parameter {:?}, expected key=value", raw)),
    }
}

fn outcome_label(result: &Result<(), TaskFailure>) -> &'static str {
    match result {
        Ok(()) => "success",
        Err(TaskFailure::Spawn(_)) => "spawn_error",
        Err(TaskFailure::NonZeroExit { .. }) => "non_zero_exit",
        Err(TaskFailure::Killed { .. }) => "killed",
        Err(TaskFailure::Crashed { .. }) => "crashed",
        Err(TaskFailure::Wait(_)) => "wait_error",
    }
}

/// Exit status of this CLI for a task result, shell-style for signals.
fn exit_status(result: &Result<(), TaskFailure>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(TaskFailure::NonZeroExit { code }) => *code,
        Err(failure) => failure.signal_number().map_or(1, |signo| 128 + signo),
    }
}

fn print_report(report: &TaskReport, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            println!("Task Report");
            println!("{}", "=".repeat(40));
            println!("Job:      {}", report.job_id);
            println!("Task:     {}", report.task);
            println!("Outcome:  {}", report.outcome);
            if let Some(ref reason) = report.reason {
                println!("Reason:   {}", reason);
            }
            println!("Started:  {}", report.started_at.to_rfc3339());
            println!("Finished: {}", report.finished_at.to_rfc3339());
            println!("Duration: {} ms", report.duration_ms);
        }
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_task(args: RunArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let job = match args.job_id {
        Some(id) => Job::new(id, args.job_dir),
        None => Job::with_random_id(args.job_dir),
    };
    let spec = args
        .params
        .into_iter()
        .fold(TaskSpec::new(args.task_name), |spec, (key, value)| {
            spec.with_parameter(key, value)
        });

    let config = DispatchConfig {
        executable: args.executable,
        runtime_args: args.runtime_args,
        memory_flag: args.memory_flag,
        memory_limit_mb: args.memory_limit_mb,
        entry_point: args.entry_point,
        kill_grace_period: args.kill_grace_secs.map(Duration::from_secs),
    };

    let stop = termination_token()?;
    let dispatcher = Dispatcher::new(config);

    let started_at = Utc::now();
    let runner = dispatcher.exec_task(&job, &spec);
    let result = tokio::select! {
        result = runner.wait() => result,
        _ = stop.cancelled() => {
            runner.kill();
            runner.wait().await
        }
    };
    let finished_at = Utc::now();

    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, runner.drain_output())
        .await
        .is_err()
    {
        tracing::warn!(job_id = %job.id, "Task output still open after exit, not waiting for it");
    }

    let report = TaskReport {
        job_id: job.id.clone(),
        task: spec.name.clone(),
        outcome: outcome_label(&result),
        reason: result.as_ref().err().map(|e| e.to_string()),
        exit_code: result.as_ref().err().and_then(TaskFailure::exit_code),
        signal: result.as_ref().err().and_then(TaskFailure::signal_number),
        started_at,
        finished_at,
        duration_ms: (finished_at - started_at).num_milliseconds(),
    };
    print_report(&report, &args.output)?;

    Ok(exit_status(&result))
}

fn print_shards(n_shards: u32, ids: &[i64]) {
    println!("{:<20} SHARD", "ID");
    println!("{}", "-".repeat(30));
    for &id in ids {
        println!("{:<20} {}", id, shard(id, n_shards));
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(run_args) => {
            let code = run_task(run_args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Shard { shards, ids } => {
            print_shards(shards, &ids);
        }
    }

    Ok(())
}
