use anyhow::Result;
use std::fmt;

use crate::queue::config::WorkerConfig;
use crate::queue::spawn::{Spawner, WorkerHandle};

/// A worker as the controller sees it: which job it runs and a handle to poll or stop it.
pub struct ParallelWorker {
    task: String,
    job_name: String,
    handle: Box<dyn WorkerHandle>,
}

impl ParallelWorker {
    /// Start `config` with `spawner`. The config is serialized first so a config that could
    /// not cross a process boundary fails here for thread workers too.
    pub fn start(spawner: &dyn Spawner, config: WorkerConfig) -> Result<Self> {
        config.to_json()?;
        let task = config.shared.task.clone();
        let job_name = config.job_name();
        let handle = spawner.spawn(config)?;
        Ok(Self {
            task,
            job_name,
            handle,
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    pub fn join(&mut self) -> Result<()> {
        self.handle.join()
    }

    /// Processes are killed without cleanup; threads return an error.
    pub fn terminate(&mut self) -> Result<()> {
        self.handle.terminate()
    }
}

impl fmt::Display for ParallelWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Worker {} {}>", self.task, self.job_name)
    }
}
