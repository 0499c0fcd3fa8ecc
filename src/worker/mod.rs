//! Out-of-process execution of training tasks.
//!
//! Every task runs as its own OS process so that it can be memory-limited and
//! killed without touching the dispatcher.
//!
//! # Components
//!
//! - [`Dispatcher`]: builds the task invocation and spawns the process
//! - [`TaskRunner`]: awaits the process outcome and exposes `kill`
//! - [`relay`]: line-by-line forwarding of stdout/stderr to a [`LogSink`]
//!
//! # Execution Flow
//!
//! 1. The scheduler calls [`Dispatcher::exec_task`] with a job and task spec
//! 2. The dispatcher logs the quoted command line and spawns the process
//! 3. Both output streams are relayed to the sink, tagged with the job id
//! 4. [`TaskRunner::wait`] resolves with the classified exit outcome

pub mod dispatcher;
pub mod relay;
pub mod runner;

pub use dispatcher::{Dispatcher, Invocation, RUN_TRAINING_TASK};
pub use relay::{LogSink, StreamTag, TracingSink};
pub use runner::TaskRunner;
