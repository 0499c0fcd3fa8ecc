use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One training request, as handed over by the scheduler.
///
/// The working directory is owned by this job alone for as long as its task
/// runs; the scheduler creates and cleans it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_dir: PathBuf,
}

impl Job {
    pub fn new(id: impl Into<String>, job_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            job_dir: job_dir.into(),
        }
    }

    /// Create a job with a freshly generated id.
    pub fn with_random_id(job_dir: impl Into<PathBuf>) -> Self {
        Self::new(Uuid::new_v4().to_string(), job_dir)
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }
}

/// Which training procedure to run, and the parameters forwarded to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Parameters as `--key value` pairs, in key order.
    pub fn parameter_args(&self) -> Vec<String> {
        self.parameters
            .iter()
            .flat_map(|(key, value)| [format!("--{}", key), value.clone()])
            .collect()
    }
}
