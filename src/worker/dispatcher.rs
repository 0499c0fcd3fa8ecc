use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::config::DispatchConfig;
use crate::training::{Job, TaskSpec};
use crate::worker::relay::{LogSink, TracingSink};
use crate::worker::runner::TaskRunner;

/// Subcommand selecting task mode in the spawned runtime.
pub const RUN_TRAINING_TASK: &str = "run-training-task";

/// A fully built process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Command line with every argument single-quoted, for logging.
    pub fn render(&self) -> String {
        let mut rendered = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&quote(&arg.to_string_lossy()));
        }
        rendered
    }
}

fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Spawns one process per training task.
///
/// The memory limit and other process settings come from the
/// [`DispatchConfig`] given at construction.
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
    sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher relaying task output through `tracing`.
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: DispatchConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Build the argument list for running `spec` on behalf of `job`.
    ///
    /// Order: runtime args, memory limit, entry point, `run-training-task`,
    /// `--task-name`, `--job-id`, `--job-directory`, then task parameters.
    pub fn invocation(&self, job: &Job, spec: &TaskSpec) -> Invocation {
        let mut args: Vec<OsString> = self
            .config
            .runtime_args
            .iter()
            .map(OsString::from)
            .collect();

        args.push(self.config.memory_arg().into());
        if let Some(ref entry_point) = self.config.entry_point {
            args.push(entry_point.clone().into_os_string());
        }
        args.push(RUN_TRAINING_TASK.into());
        args.push("--task-name".into());
        args.push(spec.name.clone().into());
        args.push("--job-id".into());
        args.push(job.id.clone().into());
        args.push("--job-directory".into());
        args.push(job.job_dir.clone().into_os_string());
        args.extend(spec.parameter_args().into_iter().map(OsString::from));

        Invocation {
            program: self.config.executable.clone(),
            args,
        }
    }

    /// Spawn the task process and return its runner without waiting.
    ///
    /// Must be called within a tokio runtime. A spawn error is not returned
    /// here: it is reported by [`TaskRunner::wait`].
    pub fn exec_task(&self, job: &Job, spec: &TaskSpec) -> TaskRunner {
        let invocation = self.invocation(job, spec);
        tracing::info!(job_id = %job.id, task = %spec.name, "{}", invocation.render());

        let job_id: Arc<str> = Arc::from(job.id.as_str());
        let spawned = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        match spawned {
            Ok(child) => {
                tracing::debug!(job_id = %job.id, pid = ?child.id(), "Task process spawned");
                TaskRunner::spawned(
                    job_id,
                    child,
                    self.sink.clone(),
                    self.config.kill_grace_period,
                )
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, task = %spec.name, error = %e, "Failed to spawn task");
                TaskRunner::spawn_failed(job_id, e)
            }
        }
    }
}
