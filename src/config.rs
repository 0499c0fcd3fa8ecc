use std::path::PathBuf;
use std::time::Duration;

/// Configuration for spawning training task processes.
///
/// Every task runs in its own process so that it can be memory-limited and
/// killed independently of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Runtime binary spawned for every task
    pub executable: PathBuf,
    /// Leading arguments for the runtime itself, placed before the memory flag
    pub runtime_args: Vec<String>,
    /// Name of the runtime flag carrying the memory limit
    pub memory_flag: String,
    /// Memory limit for each task process, in megabytes
    pub memory_limit_mb: u64,
    /// Entry script or module placed between the memory flag and the subcommand
    pub entry_point: Option<PathBuf>,
    /// Delay after `kill` before the process is sent SIGKILL.
    /// `None` sends a single SIGTERM and never escalates.
    pub kill_grace_period: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("node"),
            runtime_args: Vec::new(),
            memory_flag: "--max_old_space_size".to_string(),
            memory_limit_mb: 24000,
            entry_point: None,
            kill_grace_period: None,
        }
    }
}

impl DispatchConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_runtime_arg(mut self, arg: impl Into<String>) -> Self {
        self.runtime_args.push(arg.into());
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<PathBuf>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn with_memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    pub fn with_kill_grace_period(mut self, grace: Duration) -> Self {
        self.kill_grace_period = Some(grace);
        self
    }

    /// The rendered memory-limit argument, e.g. `--max_old_space_size=24000`.
    pub fn memory_arg(&self) -> String {
        format!("{}={}", self.memory_flag, self.memory_limit_mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_config_default() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.executable, PathBuf::from("node"));
        assert!(cfg.runtime_args.is_empty());
        assert_eq!(cfg.memory_flag, "--max_old_space_size");
        assert_eq!(cfg.memory_limit_mb, 24000);
        assert!(cfg.entry_point.is_none());
        assert!(cfg.kill_grace_period.is_none());
    }

    #[test]
    fn dispatch_config_new_keeps_defaults() {
        let cfg = DispatchConfig::new("/usr/bin/trainer");
        assert_eq!(cfg.executable, PathBuf::from("/usr/bin/trainer"));
        assert_eq!(cfg.memory_limit_mb, 24000);
    }

    #[test]
    fn dispatch_config_builders() {
        let cfg = DispatchConfig::default()
            .with_executable("sh")
            .with_runtime_arg("-c")
            .with_runtime_arg("exit 0")
            .with_entry_point("main.js")
            .with_memory_limit_mb(512)
            .with_kill_grace_period(Duration::from_secs(5));
        assert_eq!(cfg.executable, PathBuf::from("sh"));
        assert_eq!(cfg.runtime_args, vec!["-c", "exit 0"]);
        assert_eq!(cfg.entry_point, Some(PathBuf::from("main.js")));
        assert_eq!(cfg.memory_limit_mb, 512);
        assert_eq!(cfg.kill_grace_period, Some(Duration::from_secs(5)));
    }

    #[test]
    fn memory_arg_renders_flag_and_value() {
        let cfg = DispatchConfig::default().with_memory_limit_mb(1024);
        assert_eq!(cfg.memory_arg(), "--max_old_space_size=1024");
    }
}
