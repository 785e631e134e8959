//! The code that runs inside a worker thread or worker process: run one subtask in one job
//! directory, then move the directory to the outbox or to failures.

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde_json::Value;
use std::any::Any;
use std::fs;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::queue::config::WorkerConfig;
use crate::queue::job_dir::move_into;
use crate::queue::job_log::JobLog;
use crate::queue::keychain::WorkerKeychain;
use crate::tasks::{TaskContext, TaskRegistry};
use crate::utils::config::JobFiles;

pub struct TaskWorker {
    config: WorkerConfig,
    registry: Arc<TaskRegistry>,
}

impl TaskWorker {
    pub fn new(config: WorkerConfig, registry: Arc<TaskRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the subtask. On success the job directory ends up in the outbox (with
    /// `results.json` if the task returned anything); on failure it ends up in failures with
    /// `exception.txt`, and the error is returned.
    pub fn run(&self) -> Result<()> {
        let log = self.make_logger();
        match self.run_task(&log) {
            Ok(results) => {
                if let Some(results) = &results {
                    log.info(results);
                }
                log.info("SubTask Success!");
                drop(log);
                if let Err(e) = self.finish_success(results.as_ref()) {
                    self.save_exception(&e);
                    return Err(e);
                }
                Ok(())
            }
            Err(e) => {
                log.info(format!("Failure detected: {e}"));
                self.save_exception(&e);
                drop(log);
                move_into(&self.config.working_dir, &self.config.failures_dir)
                    .context("move failed job to failures")?;
                Err(e)
            }
        }
    }

    /// Never fails: a job whose log cannot be opened still has to land in outbox or failures.
    fn make_logger(&self) -> JobLog {
        let task = self.config.shared.task.as_str();
        let class_name = self.registry.class_name(task).unwrap_or(task);
        if !self.config.shared.redirect_logging {
            return JobLog::console(class_name);
        }
        JobLog::create(&self.config.working_dir, class_name).unwrap_or_else(|e| {
            debug!("{e:#}; logging to console");
            JobLog::console(class_name)
        })
    }

    fn run_task(&self, log: &JobLog) -> Result<Option<Value>> {
        let keychain = WorkerKeychain::new(self.config.shared.connected_app.clone());
        let ctx = TaskContext {
            options: &self.config.task_options,
            org: &self.config.shared.org,
            project: &self.config.shared.project,
            keychain: &keychain,
            working_dir: &self.config.working_dir,
            log,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut task = self
                .registry
                .build(&self.config.shared.task, &self.config.task_options)?;
            task.run(&ctx)
        }));
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("subtask panicked: {}", panic_message(&*payload))),
        }
    }

    fn finish_success(&self, results: Option<&Value>) -> Result<()> {
        if let Some(results) = results {
            let path = self.config.working_dir.join(JobFiles::RESULTS_FILE);
            let text = serde_json::to_string_pretty(results)?;
            fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        }
        move_into(&self.config.working_dir, &self.config.outbox_dir)
            .context("move finished job to outbox")?;
        Ok(())
    }

    /// One line per error in the chain; the last line is the innermost cause.
    fn save_exception(&self, e: &anyhow::Error) {
        let path = self.config.working_dir.join(JobFiles::EXCEPTION_FILE);
        let text = format_error_chain(e);
        if let Err(write_err) = fs::write(&path, text) {
            debug!("could not write {}: {}", path.display(), write_err);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn format_error_chain(e: &anyhow::Error) -> String {
    let mut text = format!("Error: {e}\n");
    for cause in e.chain().skip(1) {
        text.push_str(&format!("Caused by: {cause}\n"));
    }
    text
}

/// Entry point of a worker process: read a [`WorkerConfig`] as JSON from stdin and run it.
pub fn run_worker_from_stdin(registry: Arc<TaskRegistry>) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("read worker config from stdin")?;
    let config = WorkerConfig::from_json(&input)?;
    debug!(
        "Worker {} starting job {}",
        std::process::id(),
        config.job_name()
    );
    TaskWorker::new(config, registry).run()
}
