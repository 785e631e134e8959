//! Public and internal types shared by the queue, the pipeline and the subtasks.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PipelineError;
use crate::queue::SpawnKind;
use crate::utils::config::{PortionConsts, QueueConsts, ERROR_THRESHOLD, ORG_POLL_INTERVAL, WAIT_TIME};

/// Frozen snapshot of how to reach the target org.
///
/// Crosses the process boundary as plain data; workers never touch a keychain to rebuild it.
/// `kind` selects the client implementation (see [`crate::org::connect`]), `config` is opaque to
/// the queue machinery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgConnection {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl OrgConnection {
    pub const SQLITE: &'static str = "sqlite";

    /// Org backed by a local SQLite file.
    pub fn sqlite(name: &str, path: &Path) -> Self {
        let mut config = BTreeMap::new();
        config.insert("database".to_string(), path.display().to_string());
        Self {
            name: name.to_string(),
            kind: Self::SQLITE.to_string(),
            config,
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.config.get("database").map(PathBuf::from)
    }
}

/// Connected-app credential handed to workers in place of a keychain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedApp {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl fmt::Debug for ConnectedApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedApp")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

/// The slice of project configuration a subtask needs. Not the whole project.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub package: String,
}

/// Task options: string keys to JSON values.
///
/// Values arrive from the command line as strings and from code as typed JSON, so the getters
/// accept both spellings (`"3"` and `3`, `"true"` and `true`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskOptions(BTreeMap<String, Value>);

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn insert_path(&mut self, key: &str, path: &Path) {
        self.insert(key, path.display().to_string());
    }

    /// Overwrite with every key in `other`.
    pub fn merge(&mut self, other: TaskOptions) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str, PipelineError> {
        self.get_str(key)
            .ok_or_else(|| PipelineError::options(format!("Missing required option `{key}`")))
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).filter(|s| !s.is_empty()).map(PathBuf::from)
    }

    pub fn require_path(&self, key: &str) -> Result<PathBuf, PipelineError> {
        self.get_path(key)
            .ok_or_else(|| PipelineError::options(format!("Missing required option `{key}`")))
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, PipelineError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| PipelineError::options(format!("{n} is not a number"))),
            Some(Value::String(s)) => parse_count(s).map(Some),
            Some(other) => Err(PipelineError::options(format!("{other} is not a number"))),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, PipelineError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => parse_bool(s).map(Some),
            Some(other) => Err(PipelineError::options(format!("{other} is not a boolean"))),
        }
    }

    /// A nested `{name: value}` object, values rendered as strings.
    pub fn get_string_map(&self, key: &str) -> Result<BTreeMap<String, String>, PipelineError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => Ok(map
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()),
            Some(other) => Err(PipelineError::options(format!(
                "`{key}` should be a mapping, got {other}"
            ))),
        }
    }
}

impl FromIterator<(String, Value)> for TaskOptions {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parse a record count. Underscore separators are allowed: `2_000_000`.
pub fn parse_count(s: &str) -> Result<u64, PipelineError> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
    cleaned
        .parse::<u64>()
        .map_err(|_| PipelineError::options(format!("{} is not a number", s.trim())))
}

pub fn parse_bool(s: &str) -> Result<bool, PipelineError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Ok(true),
        "false" | "no" | "n" | "0" | "off" | "" => Ok(false),
        other => Err(PipelineError::options(format!("{other} is not a boolean"))),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkMode {
    Serial,
    #[default]
    Parallel,
}

impl FromStr for BulkMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(BulkMode::Serial),
            "parallel" => Ok(BulkMode::Parallel),
            _ => Err(PipelineError::options(
                "bulk_mode must be either Serial or Parallel",
            )),
        }
    }
}

impl fmt::Display for BulkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkMode::Serial => write!(f, "Serial"),
            BulkMode::Parallel => write!(f, "Parallel"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    #[default]
    Success,
    Failure,
}

/// Outcome of loading one mapping step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub sobject: String,
    pub status: StepStatus,
    pub records_processed: u64,
    pub total_row_errors: u64,
}

/// What the load subtask reports, written as `results.json` in the job directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResults {
    pub step_results: BTreeMap<String, StepResult>,
}

/// Raw run-until selectors as typed by the user. At most one may be set.
#[derive(Clone, Debug, Default)]
pub struct RunUntilOptions {
    /// Bare repetition count, e.g. `50_000`.
    pub recipe_repeated: Option<String>,
    /// `<object>:<count>` loaded during this run.
    pub records_loaded: Option<String>,
    /// `<object>:<count>` total in the org.
    pub records_in_org: Option<String>,
}

/// Full options for one data load (CLI, TOML file and library callers).
#[derive(Clone, Debug)]
pub struct LoadOpts {
    pub recipe: PathBuf,
    pub org: OrgConnection,
    pub run_until: RunUntilOptions,
    /// Created if given (must not exist yet); a temp dir otherwise.
    pub working_directory: Option<PathBuf>,
    /// Keep the temp working directory after the run (debugging).
    pub keep_working_directory: bool,
    /// Generator processes. Defaults to the physical core count.
    pub num_generator_workers: Option<usize>,
    /// Loader threads. Defaults to generators * loader ratio.
    pub num_loader_workers: Option<usize>,
    pub bulk_mode: BulkMode,
    pub ignore_row_errors: bool,
    pub drop_missing_schema: bool,
    /// Values for recipe variables.
    pub recipe_options: BTreeMap<String, String>,
    pub min_portion_size: u64,
    pub max_portion_size: u64,
    /// Multiplier applied to the portion size after each batch.
    pub growth_factor: f64,
    /// Failed jobs tolerated before the run aborts.
    pub error_threshold: usize,
    /// Pause between controller ticks.
    pub wait_time: Duration,
    /// Pause between org count polls.
    pub org_poll_interval: Duration,
    /// Portions allowed to wait on disk for a loader.
    pub load_queue_size: usize,
    pub generator_spawn: SpawnKind,
    pub loader_spawn: SpawnKind,
    pub connected_app: Option<ConnectedApp>,
    pub project: ProjectDescriptor,
    /// Progress bar and detailed status.
    pub verbose: bool,
}

impl Default for LoadOpts {
    fn default() -> Self {
        Self {
            recipe: PathBuf::new(),
            org: OrgConnection::sqlite("default", Path::new("org.db")),
            run_until: RunUntilOptions::default(),
            working_directory: None,
            keep_working_directory: false,
            num_generator_workers: None,
            num_loader_workers: None,
            bulk_mode: BulkMode::Parallel,
            ignore_row_errors: false,
            drop_missing_schema: false,
            recipe_options: BTreeMap::new(),
            min_portion_size: PortionConsts::MIN_PORTION_SIZE,
            max_portion_size: PortionConsts::MAX_PORTION_SIZE,
            growth_factor: PortionConsts::GROWTH_FACTOR,
            error_threshold: ERROR_THRESHOLD,
            wait_time: WAIT_TIME,
            org_poll_interval: ORG_POLL_INTERVAL,
            load_queue_size: QueueConsts::LOAD_QUEUE_SIZE,
            generator_spawn: SpawnKind::Process,
            loader_spawn: SpawnKind::Thread,
            connected_app: None,
            project: ProjectDescriptor::default(),
            verbose: false,
        }
    }
}
