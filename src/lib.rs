pub mod config;
pub mod error;
pub mod shard;
#[cfg(unix)]
pub mod shutdown;
pub mod training;
pub mod worker;

pub use config::DispatchConfig;
pub use error::{ShardError, TaskFailure};
pub use shard::{shard, ShardFilter};
pub use training::{Job, TaskSpec};
pub use worker::{Dispatcher, LogSink, StreamTag, TaskRunner};
