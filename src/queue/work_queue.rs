//! A directory-backed work queue for one stage of a pipeline.
//!
//! Each queue owns three directories under its parent: `<name>_inbox` (queued jobs),
//! `<name>_inprogress` (jobs a worker is running) and `<name>_outbox` (finished jobs). When one
//! queue feeds another, its outbox is the downstream inbox. The directories are the state:
//! every count below is read from disk, so the queue is observable with `ls`.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::TaskOptions;
use crate::errors::PipelineError;
use crate::queue::config::{SharedConfig, WorkerConfig};
use crate::queue::job_dir::{dir_names, list_job_dirs, move_into};
use crate::queue::parallel::ParallelWorker;
use crate::queue::spawn::Spawner;
use crate::queue::worker::format_error_chain;
use crate::utils::config::JobFiles;

/// Builds the task options of one job from its in-progress directory.
pub type MakeTaskOptions = Arc<dyn Fn(&Path) -> Result<TaskOptions> + Send + Sync>;

/// Maps a job's in-progress directory to the path it should be renamed to before starting.
pub type RenameDirectory = Arc<dyn Fn(&Path) -> Result<PathBuf> + Send + Sync>;

#[derive(Clone)]
pub struct WorkerQueueConfig {
    pub name: String,
    pub parent_dir: PathBuf,
    /// Defaults to `<parent_dir>/failures`.
    pub failures_dir: PathBuf,
    /// Defaults to `<parent_dir>/<name>_outbox`.
    pub outbox_dir: PathBuf,
    pub shared: SharedConfig,
    pub make_task_options: MakeTaskOptions,
    /// Jobs allowed to wait in the inbox beyond one per free worker.
    pub queue_size: usize,
    pub num_workers: usize,
    pub spawner: Arc<dyn Spawner>,
    pub rename_directory: Option<RenameDirectory>,
}

impl WorkerQueueConfig {
    pub fn new(
        name: &str,
        parent_dir: &Path,
        shared: SharedConfig,
        make_task_options: MakeTaskOptions,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            name: name.to_string(),
            parent_dir: parent_dir.to_path_buf(),
            failures_dir: parent_dir.join(JobFiles::FAILURES_DIR),
            outbox_dir: parent_dir.join(format!("{name}_outbox")),
            shared,
            make_task_options,
            queue_size: 0,
            num_workers: 1,
            spawner,
            rename_directory: None,
        }
    }

    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn rename_directory(mut self, rename: RenameDirectory) -> Self {
        self.rename_directory = Some(rename);
        self
    }

    pub fn failures_dir(mut self, dir: PathBuf) -> Self {
        self.failures_dir = dir;
        self
    }
}

pub struct WorkerQueue {
    config: WorkerQueueConfig,
    inbox_dir: PathBuf,
    inprogress_dir: PathBuf,
    outbox_dir: PathBuf,
    workers: Vec<ParallelWorker>,
    next_queue: Option<Box<WorkerQueue>>,
}

impl WorkerQueue {
    /// Create the queue's directories. They must not exist yet.
    pub fn new(config: WorkerQueueConfig) -> Result<Self> {
        let inbox_dir = config.parent_dir.join(format!("{}_inbox", config.name));
        let inprogress_dir = config.parent_dir.join(format!("{}_inprogress", config.name));
        let outbox_dir = config.outbox_dir.clone();
        for dir in [&inbox_dir, &inprogress_dir, &outbox_dir] {
            fs::create_dir(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(Self {
            config,
            inbox_dir,
            inprogress_dir,
            outbox_dir,
            workers: Vec::new(),
            next_queue: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &WorkerQueueConfig {
        &self.config
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox_dir
    }

    pub fn inprogress_dir(&self) -> &Path {
        &self.inprogress_dir
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }

    pub fn failures_dir(&self) -> &Path {
        &self.config.failures_dir
    }

    /// Make `other` the downstream stage: this queue's finished jobs land in its inbox.
    pub fn feeds_data_to(&mut self, other: WorkerQueue) {
        if let Err(e) = fs::remove_dir(&self.outbox_dir) {
            info!("Cannot remove outbox dir when connecting queues: {e}");
        }
        self.outbox_dir = other.inbox_dir.clone();
        self.config.outbox_dir = other.inbox_dir.clone();
        self.next_queue = Some(Box::new(other));
    }

    pub fn next_queue(&self) -> Option<&WorkerQueue> {
        self.next_queue.as_deref()
    }

    pub fn next_queue_mut(&mut self) -> Option<&mut WorkerQueue> {
        self.next_queue.as_deref_mut()
    }

    // ---- Capacity ----

    pub fn num_busy_workers(&mut self) -> usize {
        let mut busy = 0;
        for worker in self.workers.iter_mut() {
            if worker.is_alive() {
                busy += 1;
            }
        }
        busy
    }

    pub fn free_workers(&mut self) -> usize {
        let busy = self.num_busy_workers();
        self.config.num_workers.saturating_sub(busy)
    }

    /// `max(free_workers + queue_size - queued, 0)`.
    pub fn free_space(&mut self) -> Result<usize> {
        let queued = self.queued_job_dirs()?.len();
        Ok((self.free_workers() + self.config.queue_size).saturating_sub(queued))
    }

    /// No free space here, or anywhere downstream.
    pub fn full(&mut self) -> Result<bool> {
        if self.free_space()? == 0 {
            return Ok(true);
        }
        match self.next_queue.as_deref_mut() {
            Some(next) => next.full(),
            None => Ok(false),
        }
    }

    /// Nothing queued and nothing in progress.
    pub fn empty(&self) -> Result<bool> {
        Ok(self.queued_job_dirs()?.is_empty() && self.inprogress_job_dirs()?.is_empty())
    }

    // ---- Introspection (always read from disk) ----

    pub fn queued_job_dirs(&self) -> Result<Vec<PathBuf>> {
        list_job_dirs(&self.inbox_dir)
    }

    pub fn queued_jobs(&self) -> Result<Vec<String>> {
        Ok(dir_names(&self.queued_job_dirs()?))
    }

    pub fn inprogress_job_dirs(&self) -> Result<Vec<PathBuf>> {
        list_job_dirs(&self.inprogress_dir)
    }

    pub fn inprogress_jobs(&self) -> Result<Vec<String>> {
        Ok(dir_names(&self.inprogress_job_dirs()?))
    }

    pub fn outbox_job_dirs(&self) -> Result<Vec<PathBuf>> {
        list_job_dirs(&self.outbox_dir)
    }

    pub fn outbox_jobs(&self) -> Result<Vec<String>> {
        Ok(dir_names(&self.outbox_job_dirs()?))
    }

    /// Empty when the failures directory was never created.
    pub fn failed_job_dirs(&self) -> Result<Vec<PathBuf>> {
        list_job_dirs(&self.config.failures_dir)
    }

    pub fn failed_jobs(&self) -> Result<Vec<String>> {
        Ok(dir_names(&self.failed_job_dirs()?))
    }

    /// Tracked workers (live or not yet pruned by `tick`).
    pub fn workers(&self) -> &[ParallelWorker] {
        &self.workers
    }

    // ---- Moving work ----

    /// Enqueue one job: an existing directory (moved into the inbox) or a bare `name` (a fresh
    /// empty directory created in the inbox). Exactly one must be given. Fails without touching
    /// anything when the queue is full. Ticks afterwards.
    pub fn push(&mut self, job_dir: Option<&Path>, name: Option<&str>) -> Result<()> {
        match (job_dir, name) {
            (Some(_), Some(_)) => bail!("Supply name or job_dir, not both"),
            (None, None) => bail!("Supply name or job_dir"),
            _ => {}
        }
        if self.full()? {
            return Err(PipelineError::QueueFull {
                queue: self.config.name.clone(),
            }
            .into());
        }
        match (job_dir, name) {
            (Some(dir), _) => {
                move_into(dir, &self.inbox_dir)?;
            }
            (None, Some(name)) => {
                let dir = self.inbox_dir.join(name);
                fs::create_dir(&dir).with_context(|| format!("create {}", dir.display()))?;
            }
            (None, None) => {}
        }
        self.tick()
    }

    /// Prune finished workers, start queued jobs on free workers (in job order), then tick the
    /// downstream queue. Runs in the controller only.
    ///
    /// A job that cannot be started is moved to failures and the error is returned.
    pub fn tick(&mut self) -> Result<()> {
        let mut running = Vec::with_capacity(self.workers.len());
        let mut finished = Vec::new();
        for mut worker in std::mem::take(&mut self.workers) {
            if worker.is_alive() {
                running.push(worker);
            } else {
                finished.push(worker);
            }
        }
        self.workers = running;
        for worker in finished {
            self.reap(worker)?;
        }

        let free = self.free_workers();
        for job_dir in self.queued_job_dirs()?.into_iter().take(free) {
            info!("Starting job {}", job_dir.display());
            self.start_job(&job_dir)?;
        }

        if let Some(next) = self.next_queue.as_deref_mut() {
            next.tick()?;
        }
        Ok(())
    }

    fn start_job(&mut self, job_dir: &Path) -> Result<()> {
        let job_options = read_job_options(job_dir)?;
        let mut working_dir = move_into(job_dir, &self.inprogress_dir)?;
        match self.spawn_worker(&mut working_dir, job_options) {
            Ok(worker) => {
                self.workers.push(worker);
                Ok(())
            }
            Err(e) => {
                warn!("Could not start job {}: {e:#}", working_dir.display());
                self.park_in_failures(&working_dir, &e)?;
                Err(e.context(format!("start job {}", working_dir.display())))
            }
        }
    }

    /// A worker that exited while its job is still in progress died without cleaning up
    /// (killed, aborted). Its job goes to failures like any other failed job.
    fn reap(&self, mut worker: ParallelWorker) -> Result<()> {
        let outcome = worker.join();
        let job_dir = self.inprogress_dir.join(worker.job_name());
        if !job_dir.is_dir() {
            match outcome {
                Ok(()) => debug!("{worker} finished"),
                Err(e) => debug!("{worker} finished: {e:#}"),
            }
            return Ok(());
        }
        let error = match outcome {
            Ok(()) => anyhow!("worker exited without finishing the job"),
            Err(e) => e.context("worker exited without finishing the job"),
        };
        warn!("{worker} left {} behind: {error:#}", job_dir.display());
        self.park_in_failures(&job_dir, &error)
    }

    /// Move a job no worker will finish to failures. An `exception.txt` already written by the
    /// worker is kept.
    fn park_in_failures(&self, job_dir: &Path, error: &anyhow::Error) -> Result<()> {
        let exception = job_dir.join(JobFiles::EXCEPTION_FILE);
        if !exception.exists()
            && let Err(e) = fs::write(&exception, format_error_chain(error))
        {
            warn!("could not write {}: {e}", exception.display());
        }
        move_into(job_dir, &self.config.failures_dir)?;
        Ok(())
    }

    fn spawn_worker(
        &self,
        working_dir: &mut PathBuf,
        job_options: TaskOptions,
    ) -> Result<ParallelWorker> {
        // Jobs may keep metadata in their names; the hook can rename once the job is ours.
        if let Some(rename) = &self.config.rename_directory {
            let renamed = rename(working_dir)?;
            if renamed != *working_dir {
                fs::rename(&*working_dir, &renamed).with_context(|| {
                    format!("rename {} -> {}", working_dir.display(), renamed.display())
                })?;
                *working_dir = renamed;
            }
        }

        let mut options = (self.config.make_task_options)(working_dir)?;
        options.merge(job_options);
        let worker_config = WorkerConfig::new(
            self.config.shared.clone(),
            options,
            working_dir.clone(),
            self.outbox_dir.clone(),
            self.config.failures_dir.clone(),
        );
        ParallelWorker::start(self.config.spawner.as_ref(), worker_config)
    }

    /// Kill every live worker. Failures (thread workers) are logged, not returned.
    pub fn terminate_all(&mut self) {
        for worker in self.workers.iter_mut() {
            if worker.is_alive()
                && let Err(e) = worker.terminate()
            {
                warn!("Could not terminate worker: {e}");
            }
        }
    }

    /// Wait for every tracked worker. A failed job is not an error here: it is in failures.
    pub fn join_all(&mut self) {
        for mut worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                debug!("{worker}: {e:#}");
            }
        }
    }
}

/// Options stored in the job directory override the queue's computed options.
fn read_job_options(job_dir: &Path) -> Result<TaskOptions> {
    let path = job_dir.join(JobFiles::OPTIONS_FILE);
    if !path.is_file() {
        return Ok(TaskOptions::new());
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}
