//! Subtasks a worker can run, and the registry that turns a task name back into code on the
//! worker side of the process boundary.

pub mod generate;
pub mod load;
pub mod mapping;
pub mod recipe;
pub mod sleep;
pub mod working_directory;

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::errors::PipelineError;
use crate::queue::{JobLog, WorkerKeychain};
use crate::{OrgConnection, ProjectDescriptor, TaskOptions};

pub use generate::GenerateData;
pub use load::LoadData;
pub use mapping::{Mapping, MappingStep};
pub use recipe::Recipe;
pub use sleep::Sleep;
pub use working_directory::JobWorkingDirectory;

pub const GENERATE_DATA: &str = "generate_data";
pub const LOAD_DATA: &str = "load_data";
pub const SLEEP: &str = "sleep";

/// Everything a subtask may look at while it runs.
pub struct TaskContext<'a> {
    pub options: &'a TaskOptions,
    pub org: &'a OrgConnection,
    pub project: &'a ProjectDescriptor,
    pub keychain: &'a WorkerKeychain,
    pub working_dir: &'a Path,
    pub log: &'a JobLog,
}

pub trait Task {
    /// Run once. Returned values are written to `results.json` in the job directory.
    fn run(&mut self, ctx: &TaskContext<'_>) -> Result<Option<Value>>;
}

/// Builds a task from its options; option errors surface here, before any work.
pub type TaskFactory = Arc<dyn Fn(&TaskOptions) -> Result<Box<dyn Task>> + Send + Sync>;

#[derive(Clone)]
struct RegisteredTask {
    class_name: String,
    factory: TaskFactory,
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `generate_data`, `load_data` and `sleep`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(GENERATE_DATA, "GenerateData", |opts| {
            Ok(Box::new(GenerateData::from_options(opts)?))
        });
        registry.register(LOAD_DATA, "LoadData", |opts| {
            Ok(Box::new(LoadData::from_options(opts)?))
        });
        registry.register(SLEEP, "Sleep", |opts| Ok(Box::new(Sleep::from_options(opts)?)));
        registry
    }

    /// `class_name` names the job's log file (`<class_name>.log`).
    pub fn register<F>(&mut self, name: &str, class_name: &str, factory: F)
    where
        F: Fn(&TaskOptions) -> Result<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.tasks.insert(
            name.to_string(),
            RegisteredTask {
                class_name: class_name.to_string(),
                factory: Arc::new(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn class_name(&self, name: &str) -> Option<&str> {
        self.tasks.get(name).map(|t| t.class_name.as_str())
    }

    pub fn build(&self, name: &str, options: &TaskOptions) -> Result<Box<dyn Task>> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| PipelineError::UnknownTask(name.to_string()))?;
        (task.factory)(options)
    }
}
