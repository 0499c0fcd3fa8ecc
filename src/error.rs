use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Why a training task did not complete successfully.
///
/// Killed and crashed are kept apart: the first is the expected result of a
/// caller-initiated `kill`, the second is a fault the scheduler may want to
/// resubmit.
#[derive(Error, Debug, Clone)]
pub enum TaskFailure {
    #[error("Failed to spawn task process: {0}")]
    Spawn(#[source] Arc<io::Error>),

    #[error("Command exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("Killed by {signal}")]
    Killed { signal: String, signo: i32 },

    #[error("Command crashed with signal {signal}")]
    Crashed { signal: String, signo: i32 },

    #[error("Failed to wait for task process: {0}")]
    Wait(#[source] Arc<io::Error>),
}

impl TaskFailure {
    pub fn spawn(err: io::Error) -> Self {
        TaskFailure::Spawn(Arc::new(err))
    }

    pub fn wait(err: io::Error) -> Self {
        TaskFailure::Wait(Arc::new(err))
    }

    /// True when the process was terminated on request rather than crashing.
    pub fn is_killed(&self) -> bool {
        matches!(self, TaskFailure::Killed { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TaskFailure::NonZeroExit { code } => Some(*code),
            _ => None,
        }
    }

    /// Number of the signal that ended the process, if one did.
    pub fn signal_number(&self) -> Option<i32> {
        match self {
            TaskFailure::Killed { signo, .. } | TaskFailure::Crashed { signo, .. } if *signo > 0 => {
                Some(*signo)
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    #[error("Shard count must be positive")]
    NoShards,

    #[error("Invalid shard index {index}, must be between 0 and {max}")]
    IndexOutOfRange { index: u32, max: u32 },
}
