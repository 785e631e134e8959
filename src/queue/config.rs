//! What a worker needs to run one job, as plain data.
//!
//! [`WorkerConfig`] is the only thing that crosses into a worker process (JSON on stdin), so it
//! carries a schema version and holds nothing a worker could not rebuild from text.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::errors::PipelineError;
use crate::{ConnectedApp, OrgConnection, ProjectDescriptor, TaskOptions};

pub const WORKER_CONFIG_SCHEMA_VERSION: u32 = 1;

/// Settings every job of one queue shares.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Registry name of the subtask, e.g. `generate_data`.
    pub task: String,
    pub org: OrgConnection,
    #[serde(default)]
    pub connected_app: Option<ConnectedApp>,
    #[serde(default)]
    pub project: ProjectDescriptor,
    /// Write the subtask's log to `<TaskName>.log` in the job directory.
    #[serde(default = "default_true")]
    pub redirect_logging: bool,
}

fn default_true() -> bool {
    true
}

impl SharedConfig {
    pub fn new(task: &str, org: OrgConnection) -> Self {
        Self {
            task: task.to_string(),
            org,
            connected_app: None,
            project: ProjectDescriptor::default(),
            redirect_logging: true,
        }
    }
}

/// Shared settings plus the per-job bits: options and the three directories a worker touches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub schema_version: u32,
    #[serde(flatten)]
    pub shared: SharedConfig,
    pub task_options: TaskOptions,
    /// The job directory, already in the queue's in-progress area.
    pub working_dir: PathBuf,
    pub outbox_dir: PathBuf,
    pub failures_dir: PathBuf,
}

impl WorkerConfig {
    pub fn new(
        shared: SharedConfig,
        task_options: TaskOptions,
        working_dir: PathBuf,
        outbox_dir: PathBuf,
        failures_dir: PathBuf,
    ) -> Self {
        Self {
            schema_version: WORKER_CONFIG_SCHEMA_VERSION,
            shared,
            task_options,
            working_dir,
            outbox_dir,
            failures_dir,
        }
    }

    /// Job directory name, for log lines.
    pub fn job_name(&self) -> String {
        self.working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize worker config")
    }

    /// Parse a config written by [`WorkerConfig::to_json`]. The version is checked before the
    /// rest so an old worker reports a version mismatch rather than a missing field.
    pub fn from_json(s: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(s).context("worker config is not JSON")?;
        let found = raw
            .get("schema_version")
            .and_then(Value::as_u64)
            .context("worker config has no schema_version")?;
        if found != u64::from(WORKER_CONFIG_SCHEMA_VERSION) {
            return Err(PipelineError::UnsupportedSchemaVersion {
                found: u32::try_from(found).unwrap_or(u32::MAX),
                expected: WORKER_CONFIG_SCHEMA_VERSION,
            }
            .into());
        }
        serde_json::from_value(raw).context("parse worker config")
    }
}
