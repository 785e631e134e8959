//! The data load: seed batch, then the controller loop that keeps the queues busy until the
//! run-until target is covered, then the drain.

use anyhow::{Context, Result};
use kdam::Bar;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::engine::progress::{create_progress_bar, finish_progress_bar, set_progress};
use crate::errors::PipelineError;
use crate::org::connect;
use crate::pipeline::poller::OrgCountPoller;
use crate::pipeline::portions::PortionGenerator;
use crate::pipeline::queue_manager::{
    QueueManager, QueueManagerConfig, data_loader_new_directory_name,
};
use crate::pipeline::run_until::{RunUntil, determine_run_until};
use crate::pipeline::status::UploadStatus;
use crate::pipeline::subtask_config::{SubtaskConfigurator, vars_value};
use crate::queue::{JobLog, WorkerKeychain};
use crate::tasks::generate::COUNT_REPS;
use crate::tasks::{GENERATE_DATA, JobWorkingDirectory, LOAD_DATA, Recipe, TaskContext, TaskRegistry};
use crate::utils::config::{FINISH_MESSAGE_COOLDOWN, JobFiles, QueueConsts};
use crate::utils::{cap_worker_counts, prepare_working_dir};
use crate::{BulkMode, LoadOpts, LoadResults, TaskOptions};

/// Row successes and errors per object, from load results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunningTotals {
    pub successes: u64,
    pub errors: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DataLoadSummary {
    /// Sets the run had to produce.
    pub target: u64,
    /// Set when the target was already met and no work was scheduled.
    pub nothing_to_do: Option<String>,
    pub template_sets: u64,
    /// Sets loaded, template included.
    pub sets_finished: u64,
    pub sobject_counts: BTreeMap<String, RunningTotals>,
    pub failed_job_dirs: Vec<PathBuf>,
    /// Kept only when it outlives the run (given, or kept for debugging).
    pub working_directory: Option<PathBuf>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl DataLoadSummary {
    pub fn successes(&self, sobject: &str) -> u64 {
        self.sobject_counts
            .get(sobject)
            .map(|t| t.successes)
            .unwrap_or(0)
    }
}

pub struct DataLoad {
    opts: LoadOpts,
    registry: Arc<TaskRegistry>,
    stop: Arc<AtomicBool>,
    sobject_counts: BTreeMap<String, RunningTotals>,
    /// Load outbox jobs whose results are already in `sobject_counts`.
    counted_jobs: BTreeSet<PathBuf>,
}

impl DataLoad {
    /// Check options that need no org. Nothing is created on disk.
    pub fn new(opts: LoadOpts) -> Result<Self> {
        validate_opts(&opts)?;
        Ok(Self {
            opts,
            registry: Arc::new(TaskRegistry::builtin()),
            stop: Arc::new(AtomicBool::new(false)),
            sobject_counts: BTreeMap::new(),
            counted_jobs: BTreeSet::new(),
        })
    }

    /// Tasks for thread workers and the seed batch. Process workers always use the built-ins.
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Set to stop admitting new portions; in-flight jobs are drained.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn opts(&self) -> &LoadOpts {
        &self.opts
    }

    /// `(generators, loaders)`: serial mode runs one of each; otherwise physical cores and four
    /// loaders per generator unless given, capped by the open-file limit.
    pub fn worker_counts(&self) -> (usize, usize) {
        if self.opts.bulk_mode == BulkMode::Serial {
            return (1, 1);
        }
        let generators = self
            .opts
            .num_generator_workers
            .unwrap_or_else(default_generator_workers);
        let loaders = self
            .opts
            .num_loader_workers
            .unwrap_or(generators * QueueConsts::WORKER_TO_LOADER_RATIO);
        cap_worker_counts(generators, loaders)
    }

    pub fn run(&mut self) -> Result<DataLoadSummary> {
        let start = Instant::now();
        let run_until = {
            let org = connect(&self.opts.org)?;
            determine_run_until(&self.opts.run_until, org.as_ref())?
        };
        let (num_generators, num_loaders) = self.worker_counts();
        debug!("{num_generators} generator workers, {num_loaders} loader workers");

        let working_dir = prepare_working_dir(
            self.opts.working_directory.as_deref(),
            self.opts.keep_working_directory,
        )?;
        let wd_path = working_dir.path().to_path_buf();
        info!("Working directory is {}", wd_path.display());
        let kept_dir = (self.opts.working_directory.is_some() || self.opts.keep_working_directory)
            .then(|| wd_path.clone());

        if run_until.nothing_to_do() {
            let because = run_until.nothing_to_do_because();
            info!("Dataload is finished before it started! {because}");
            return Ok(DataLoadSummary {
                target: run_until.gap(),
                nothing_to_do: Some(because),
                working_directory: kept_dir,
                elapsed: start.elapsed(),
                ..Default::default()
            });
        }

        let (template_dir, template_sets) = self.generate_and_load_initial_batch(&wd_path, &run_until)?;

        let mut manager = QueueManager::new(QueueManagerConfig {
            working_dir: wd_path.clone(),
            org: self.opts.org.clone(),
            connected_app: self.opts.connected_app.clone(),
            project: self.opts.project.clone(),
            generator_spawner: self.opts.generator_spawn.spawner(Arc::clone(&self.registry))?,
            loader_spawner: self.opts.loader_spawn.spawner(Arc::clone(&self.registry))?,
            num_generator_workers: num_generators,
            num_loader_workers: num_loaders,
            load_queue_size: self.opts.load_queue_size,
            subtasks: self.subtask_configurator(&run_until),
        })?;
        let mut portions = PortionGenerator::with_growth_factor(
            run_until.gap(),
            self.opts.min_portion_size,
            self.opts.max_portion_size,
            self.opts.growth_factor,
        );
        let mut poller = match run_until.sobject_name() {
            Some(sobject) => Some(OrgCountPoller::spawn(
                self.opts.org.clone(),
                sobject.to_string(),
                self.opts.org_poll_interval,
            )?),
            None => None,
        };
        let bar = self
            .opts
            .verbose
            .then(|| create_progress_bar(run_until.gap(), "Sets loaded"));

        let outcome = self
            .main_loop(
                &mut manager,
                &mut portions,
                &template_dir,
                template_sets,
                poller.as_mut(),
                bar.as_ref(),
                start,
            )
            .and_then(|()| self.finish(&mut manager, template_sets, start));
        if let Some(poller) = poller.as_mut() {
            poller.stop();
        }
        if let Some(bar) = &bar {
            finish_progress_bar(bar);
        }

        let status = match outcome {
            Ok(status) => status,
            Err(e) => {
                warn!("Stopping workers: {e}");
                manager.terminate_all()?;
                manager.join_all()?;
                return Err(e);
            }
        };

        let summary = DataLoadSummary {
            target: run_until.gap(),
            nothing_to_do: None,
            template_sets,
            sets_finished: status.sets_finished,
            sobject_counts: self.sobject_counts.clone(),
            failed_job_dirs: manager.failed_job_dirs()?,
            working_directory: kept_dir,
            elapsed: start.elapsed(),
        };
        let result_msg = match run_until.sobject_name() {
            Some(sobject) => format!(
                "{} {sobject} records and associated records",
                summary.successes(sobject)
            ),
            None => format!("{} iterations", run_until.target()),
        };
        info!("Created {result_msg} in {:.2?}.", summary.elapsed);
        drop(working_dir);
        Ok(summary)
    }

    fn subtask_configurator(&self, run_until: &RunUntil) -> SubtaskConfigurator {
        SubtaskConfigurator {
            recipe: self.opts.recipe.clone(),
            run_until: run_until.clone(),
            bulk_mode: self.opts.bulk_mode,
            recipe_options: self.opts.recipe_options.clone(),
            ignore_row_errors: self.opts.ignore_row_errors,
            drop_missing_schema: self.opts.drop_missing_schema,
        }
    }

    /// Generate and load one small batch in this process so every `just_once` object exists in
    /// the org before parallel jobs start. Returns the renamed template dir (id mappings,
    /// mapping and continuation files only) and the sets it loaded.
    fn generate_and_load_initial_batch(
        &mut self,
        working_dir: &Path,
        run_until: &RunUntil,
    ) -> Result<(PathBuf, u64)> {
        let template_dir = working_dir.join(JobFiles::TEMPLATE_DIR);
        fs::create_dir(&template_dir)
            .with_context(|| format!("create {}", template_dir.display()))?;
        let wd = JobWorkingDirectory::new(&template_dir);

        // Small targets are cheapest in one go.
        let gap = run_until.gap();
        let num_records = if gap < self.opts.min_portion_size { gap } else { 1 };

        let mut gen_options = TaskOptions::new()
            .with("generator_yaml", self.opts.recipe.display().to_string())
            .with("num_records", num_records)
            .with(
                "num_records_tablename",
                run_until.sobject_name().unwrap_or(COUNT_REPS),
            )
            .with("database_url", wd.database_url())
            .with("vars", vars_value(&self.opts.recipe_options));
        gen_options.insert_path("generate_mapping_file", &wd.mapping_file());
        gen_options.insert_path("generate_continuation_file", &wd.continuation_file());
        gen_options.insert_path("working_directory", &template_dir);
        self.run_inline(GENERATE_DATA, &gen_options, &template_dir)?;

        let mut load_options = TaskOptions::new()
            .with("database_url", wd.database_url())
            .with("bulk_mode", self.opts.bulk_mode.to_string())
            .with("ignore_row_errors", self.opts.ignore_row_errors)
            .with("drop_missing_schema", self.opts.drop_missing_schema)
            .with("set_recently_viewed", false);
        load_options.insert_path("mapping", &wd.mapping_file());
        if let Some(results) = self.run_inline(LOAD_DATA, &load_options, &template_dir)? {
            let results: LoadResults =
                serde_json::from_value(results).context("parse template load results")?;
            self.add_load_results(&results);
        }

        let template_sets = match run_until.sobject_name() {
            Some(sobject) => wd.record_counts()?.get(sobject).copied().unwrap_or(0),
            None => num_records,
        };

        let renamed = data_loader_new_directory_name(&template_dir, run_until)?;
        if renamed != template_dir {
            fs::rename(&template_dir, &renamed).with_context(|| {
                format!("rename {} -> {}", template_dir.display(), renamed.display())
            })?;
        }
        // Jobs copy the template; all they need from its database are the id mappings.
        JobWorkingDirectory::new(&renamed).cleanup_data_tables()?;
        debug!("Template {} holds {template_sets} sets", renamed.display());
        Ok((renamed, template_sets))
    }

    fn run_inline(
        &self,
        task_name: &str,
        options: &TaskOptions,
        working_dir: &Path,
    ) -> Result<Option<serde_json::Value>> {
        let keychain = WorkerKeychain::new(self.opts.connected_app.clone());
        let log = JobLog::console(self.registry.class_name(task_name).unwrap_or(task_name));
        let ctx = TaskContext {
            options,
            org: &self.opts.org,
            project: &self.opts.project,
            keychain: &keychain,
            working_dir,
            log: &log,
        };
        let mut task = self.registry.build(task_name, options)?;
        task.run(&ctx)
            .with_context(|| format!("{task_name} failed while preparing the template"))
    }

    #[allow(clippy::too_many_arguments)]
    fn main_loop(
        &mut self,
        manager: &mut QueueManager,
        portions: &mut PortionGenerator,
        template_dir: &Path,
        template_sets: u64,
        mut poller: Option<&mut OrgCountPoller>,
        bar: Option<&Arc<Mutex<Bar>>>,
        start: Instant,
    ) -> Result<()> {
        let mut status = manager.get_upload_status(portions.next_batch_size(), template_sets)?;
        while !portions.done(status.total_sets_working_on_or_uploaded()) {
            if self.stop.load(Ordering::SeqCst) {
                warn!("Interrupted: no new portions will be started");
                break;
            }
            debug!("Working Directory: {}", template_dir.display());
            manager.tick(portions, template_dir, template_sets)?;
            self.update_running_totals(manager)?;
            self.print_running_totals();

            std::thread::sleep(self.opts.wait_time);

            status = self.report_status(manager, portions.batch_size(), template_sets, start)?;
            if let Some(poller) = poller.as_deref_mut() {
                status.confirmed_count_in_org = poller.latest()?;
            }
            if let Some(bar) = bar {
                set_progress(bar, status.sets_finished);
            }
        }
        Ok(())
    }

    /// Log a progress report and enforce the failure threshold.
    fn report_status(
        &self,
        manager: &mut QueueManager,
        batch_size: u64,
        template_sets: u64,
        start: Instant,
    ) -> Result<UploadStatus> {
        info!("\n********** PROGRESS *********");
        let mut status = manager.get_upload_status(batch_size, template_sets)?;
        status.elapsed = start.elapsed();
        info!("{}", status.display(self.opts.verbose));
        if status.sets_failed > 0 {
            log_failures(manager)?;
        }
        self.check_error_threshold(manager, status.sets_failed)?;
        Ok(status)
    }

    fn check_error_threshold(&self, manager: &QueueManager, failed: usize) -> Result<()> {
        if failed > self.opts.error_threshold {
            return Err(PipelineError::ErrorThresholdExceeded {
                failed,
                threshold: self.opts.error_threshold,
                failed_dirs: manager.failed_job_dirs()?,
            }
            .into());
        }
        Ok(())
    }

    /// Wait for every in-flight job, then report.
    fn finish(
        &mut self,
        manager: &mut QueueManager,
        template_sets: u64,
        start: Instant,
    ) -> Result<UploadStatus> {
        let mut old_message: Option<String> = None;
        let mut cooldown = FINISH_MESSAGE_COOLDOWN;
        while !manager.check_finished()? {
            let status = manager.get_upload_status(0, template_sets)?;
            let msg = format!(
                "Waiting for {} data generators, {} uploads to finish",
                status.sets_being_generated, status.sets_being_loaded
            );
            if old_message.as_deref() != Some(msg.as_str()) || cooldown < 1 {
                info!("{msg}");
                old_message = Some(msg);
                self.update_running_totals(manager)?;
                self.print_running_totals();
                cooldown = FINISH_MESSAGE_COOLDOWN;
            } else {
                cooldown -= 1;
            }
            std::thread::sleep(self.opts.wait_time);
        }

        log_failures(manager)?;
        info!("");
        info!(" == Results == ");
        self.update_running_totals(manager)?;
        self.print_running_totals();

        let mut status = manager.get_upload_status(0, template_sets)?;
        status.elapsed = start.elapsed();
        self.check_error_threshold(manager, status.sets_failed)?;
        Ok(status)
    }

    /// Fold in `results.json` of load jobs that finished since the last call.
    fn update_running_totals(&mut self, manager: &QueueManager) -> Result<()> {
        for job_dir in manager.data_load_queue()?.outbox_job_dirs()? {
            if !self.counted_jobs.insert(job_dir.clone()) {
                continue;
            }
            let path = job_dir.join(JobFiles::RESULTS_FILE);
            let Ok(text) = fs::read_to_string(&path) else {
                warn!("No load results in {}", job_dir.display());
                continue;
            };
            match serde_json::from_str::<LoadResults>(&text) {
                Ok(results) => self.add_load_results(&results),
                Err(e) => warn!("Unexpected load results in {}: {e}", path.display()),
            }
        }
        Ok(())
    }

    fn add_load_results(&mut self, results: &LoadResults) {
        for result in results.step_results.values() {
            let totals = self.sobject_counts.entry(result.sobject.clone()).or_default();
            totals.errors += result.total_row_errors;
            totals.successes += result
                .records_processed
                .saturating_sub(result.total_row_errors);
        }
    }

    fn print_running_totals(&self) {
        for (name, totals) in &self.sobject_counts {
            info!(
                "       {name}: {} successes, {} errors",
                totals.successes, totals.errors
            );
        }
    }
}

/// One line per failed job: its last error and where to look.
fn log_failures(manager: &QueueManager) -> Result<()> {
    let descriptions = manager.failure_descriptions()?;
    for description in &descriptions {
        info!("{description}");
    }
    for dir in manager.failed_job_dirs()? {
        info!(
            "Failed job {}: see {} and the log files beside it",
            dir.display(),
            dir.join(JobFiles::EXCEPTION_FILE).display()
        );
    }
    Ok(())
}

fn validate_opts(opts: &LoadOpts) -> Result<()> {
    if !opts.recipe.is_file() {
        return Err(
            PipelineError::options(format!("Cannot find recipe `{}`", opts.recipe.display()))
                .into(),
        );
    }
    let recipe = Recipe::load(&opts.recipe)?;
    recipe.resolve_vars(&opts.recipe_options)?;
    if opts.num_generator_workers == Some(0) {
        return Err(PipelineError::options("num_processes must be at least 1").into());
    }
    if opts.num_loader_workers == Some(0) {
        return Err(PipelineError::options("num_loaders must be at least 1").into());
    }
    if opts.min_portion_size == 0 || opts.min_portion_size > opts.max_portion_size {
        return Err(PipelineError::options(format!(
            "Portion sizes must satisfy 0 < min ({}) <= max ({})",
            opts.min_portion_size, opts.max_portion_size
        ))
        .into());
    }
    if opts.growth_factor.is_nan() || opts.growth_factor < 1.0 {
        return Err(PipelineError::options(format!(
            "growth_factor must be at least 1.0, got {}",
            opts.growth_factor
        ))
        .into());
    }
    Ok(())
}

/// Physical cores: extra logical cores do little for CPU-bound generation.
fn default_generator_workers() -> usize {
    sysinfo::System::physical_core_count()
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
        .max(1)
}
