//! Two chained queues, generation then load, and the admission of new generator jobs.

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::pipeline::portions::PortionGenerator;
use crate::pipeline::run_until::RunUntil;
use crate::pipeline::status::UploadStatus;
use crate::pipeline::subtask_config::SubtaskConfigurator;
use crate::queue::job_dir::{copy_tree, job_dir_name, set_count_from_names, with_count};
use crate::queue::{SharedConfig, Spawner, WorkerQueue, WorkerQueueConfig};
use crate::tasks::{GENERATE_DATA, JobWorkingDirectory, LOAD_DATA};
use crate::utils::config::{JobFiles, QueueConsts};
use crate::{ConnectedApp, OrgConnection, ProjectDescriptor};

pub struct QueueManagerConfig {
    /// Parent of both queues, the shared failures dir and the staging dir.
    pub working_dir: PathBuf,
    pub org: OrgConnection,
    pub connected_app: Option<ConnectedApp>,
    pub project: ProjectDescriptor,
    pub generator_spawner: Arc<dyn Spawner>,
    pub loader_spawner: Arc<dyn Spawner>,
    pub num_generator_workers: usize,
    pub num_loader_workers: usize,
    pub load_queue_size: usize,
    pub subtasks: SubtaskConfigurator,
}

pub struct QueueManager {
    /// Head of the pipeline; owns the load queue.
    data_gen: WorkerQueue,
    run_until: RunUntil,
    staging_dir: PathBuf,
    job_counter: u64,
    num_generator_workers: usize,
    num_loader_workers: usize,
}

impl QueueManager {
    pub fn new(config: QueueManagerConfig) -> Result<Self> {
        let shared = |task: &str| {
            let mut shared = SharedConfig::new(task, config.org.clone());
            shared.connected_app = config.connected_app.clone();
            shared.project = config.project.clone();
            shared
        };
        let subtasks = Arc::new(config.subtasks);

        let gen_opts = Arc::clone(&subtasks);
        let data_gen_config = WorkerQueueConfig::new(
            QueueConsts::DATA_GEN_QUEUE_NAME,
            &config.working_dir,
            shared(GENERATE_DATA),
            Arc::new(move |dir: &Path| gen_opts.data_generator_opts(dir)),
            config.generator_spawner,
        )
        .queue_size(QueueConsts::DATA_GEN_QUEUE_SIZE)
        .num_workers(config.num_generator_workers);

        let load_opts = Arc::clone(&subtasks);
        let rename_run_until = subtasks.run_until.clone();
        let data_load_config = WorkerQueueConfig::new(
            QueueConsts::DATA_LOAD_QUEUE_NAME,
            &config.working_dir,
            shared(LOAD_DATA),
            Arc::new(move |dir: &Path| load_opts.data_loader_opts(dir)),
            config.loader_spawner,
        )
        .queue_size(config.load_queue_size)
        .num_workers(config.num_loader_workers)
        .rename_directory(Arc::new(move |dir: &Path| {
            data_loader_new_directory_name(dir, &rename_run_until)
        }));

        let mut data_gen = WorkerQueue::new(data_gen_config)?;
        let data_load = WorkerQueue::new(data_load_config)?;
        data_gen.feeds_data_to(data_load);

        let staging_dir = config.working_dir.join(JobFiles::STAGING_DIR);
        fs::create_dir(&staging_dir)
            .with_context(|| format!("create {}", staging_dir.display()))?;

        Ok(Self {
            data_gen,
            run_until: subtasks.run_until.clone(),
            staging_dir,
            job_counter: 0,
            num_generator_workers: config.num_generator_workers,
            num_loader_workers: config.num_loader_workers,
        })
    }

    pub fn data_load_queue(&self) -> Result<&WorkerQueue> {
        self.data_gen
            .next_queue()
            .context("data_load queue is not connected")
    }

    fn data_load_queue_mut(&mut self) -> Result<&mut WorkerQueue> {
        self.data_gen
            .next_queue_mut()
            .context("data_load queue is not connected")
    }

    pub fn num_generator_workers(&self) -> usize {
        self.num_generator_workers
    }

    pub fn num_loader_workers(&self) -> usize {
        self.num_loader_workers
    }

    pub fn run_until(&self) -> &RunUntil {
        &self.run_until
    }

    /// Advance both queues, then fill free generator slots with new portions until the target is
    /// covered, the load queue backs up, or the portions run out. At most one job is admitted per
    /// generator slot that was free when the tick started.
    pub fn tick(
        &mut self,
        portions: &mut PortionGenerator,
        template_dir: &Path,
        template_sets: u64,
    ) -> Result<()> {
        self.data_gen.tick()?;
        let mut slots = self.data_gen.free_workers();
        while slots > 0 {
            let status = self.get_upload_status(portions.next_batch_size(), template_sets)?;
            let so_far = status.total_sets_working_on_or_uploaded();
            if portions.done(so_far) || self.data_gen.free_workers() == 0 {
                break;
            }
            if self.data_gen.full()? {
                info!("Waiting before datagen (load queue is full)");
                break;
            }
            self.job_counter += 1;
            let batch_size = portions.next_batch(so_far);
            if batch_size == 0 {
                info!("All scheduled portions generated and being uploaded");
                break;
            }
            let job_dir = self.generator_data_dir(self.job_counter, template_dir, batch_size)?;
            debug!("Queueing {}", job_dir.display());
            self.data_gen.push(Some(&job_dir), None)?;
            slots -= 1;
        }
        Ok(())
    }

    /// Copy the template into `<staging>/<idx>_<batch_size>`.
    fn generator_data_dir(&self, idx: u64, template_dir: &Path, batch_size: u64) -> Result<PathBuf> {
        let data_dir = self.staging_dir.join(job_dir_name(idx, batch_size));
        copy_tree(template_dir, &data_dir)?;
        Ok(data_dir)
    }

    /// Counts read from the queue directories. `template_sets` were loaded before the queues
    /// started and count as finished.
    pub fn get_upload_status(&mut self, batch_size: u64, template_sets: u64) -> Result<UploadStatus> {
        let num_loader_workers = self.num_loader_workers;
        let num_generator_workers = self.num_generator_workers;
        let sets_failed = self.failed_job_dirs()?.len();
        let data_gen_free_workers = self.data_gen.free_workers();
        let gen_queued = self.data_gen.queued_jobs()?;
        let gen_inprogress = self.data_gen.inprogress_jobs()?;
        let load = self.data_load_queue()?;
        let load_queued = load.queued_jobs()?;
        let load_inprogress = load.inprogress_jobs()?;
        let load_finished = load.outbox_jobs()?;

        Ok(UploadStatus {
            confirmed_count_in_org: None,
            target_count: self.run_until.gap(),
            base_batch_size: batch_size,
            sets_queued_to_be_generated: set_count_from_names(&gen_queued),
            sets_being_generated: set_count_from_names(&gen_inprogress),
            sets_queued_for_loading: set_count_from_names(&load_queued),
            sets_being_loaded: set_count_from_names(&load_inprogress),
            sets_finished: set_count_from_names(&load_finished) + template_sets,
            sets_failed,
            user_max_num_generator_workers: num_generator_workers,
            user_max_num_loader_workers: num_loader_workers,
            inprogress_generator_jobs: gen_inprogress.len(),
            inprogress_loader_jobs: load_inprogress.len(),
            data_gen_free_workers,
            elapsed: Default::default(),
        })
    }

    /// Failed job directories of both queues, each once.
    pub fn failed_job_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs: BTreeSet<PathBuf> = self.data_gen.failed_job_dirs()?.into_iter().collect();
        dirs.extend(self.data_load_queue()?.failed_job_dirs()?);
        Ok(dirs.into_iter().collect())
    }

    /// Last line of each failed job's `exception.txt`.
    pub fn failure_descriptions(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for dir in self.failed_job_dirs()? {
            let path = dir.join(JobFiles::EXCEPTION_FILE);
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            if let Some(line) = text.trim().lines().last() {
                out.push(line.to_string());
            }
        }
        Ok(out)
    }

    /// Tick, then report whether every worker is done and nothing is left waiting.
    pub fn check_finished(&mut self) -> Result<bool> {
        self.data_gen.tick()?;
        let gen_idle = self.data_gen.workers().is_empty() && self.data_gen.queued_jobs()?.is_empty();
        let load = self.data_load_queue()?;
        let load_idle = load.workers().is_empty() && load.queued_jobs()?.is_empty();
        Ok(gen_idle && load_idle)
    }

    /// Kill every live worker of both queues.
    pub fn terminate_all(&mut self) -> Result<()> {
        self.data_gen.terminate_all();
        self.data_load_queue_mut()?.terminate_all();
        Ok(())
    }

    /// Wait for every tracked worker of both queues.
    pub fn join_all(&mut self) -> Result<()> {
        self.data_gen.join_all();
        self.data_load_queue_mut()?.join_all();
        Ok(())
    }
}

/// Rename `<idx>_<n>` to `<idx>_<true count>` where the true count is the number of run-until
/// objects in the job database. Unchanged when counting repetitions.
///
/// The count is taken before loading, so row errors are not reflected.
pub fn data_loader_new_directory_name(working_dir: &Path, run_until: &RunUntil) -> Result<PathBuf> {
    let Some(sobject) = run_until.sobject_name() else {
        return Ok(working_dir.to_path_buf());
    };
    let counts = JobWorkingDirectory::new(working_dir).record_counts()?;
    let count = counts.get(sobject).copied().unwrap_or(0);
    Ok(with_count(working_dir, count))
}
