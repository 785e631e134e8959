//! CLI command handlers: `run` drives a data load; the hidden `worker` runs one job.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::engine::arg_parser::{Cli, Commands, RunArgs, parse_pairs};
use crate::pipeline::DataLoad;
use crate::queue::run_worker_from_stdin;
use crate::tasks::TaskRegistry;
use crate::utils::{apply_file_to_opts, load_connected_app, load_snowqueue_toml, setup_logging};
use crate::{LoadOpts, OrgConnection, RunUntilOptions};

/// Settings file first, then CLI flags on top.
fn setup_opts(args: &RunArgs) -> Result<LoadOpts> {
    let cwd = std::env::current_dir().context("current directory")?;
    let mut opts = LoadOpts::default();
    if let Some(file) = load_snowqueue_toml(&cwd) {
        apply_file_to_opts(&file, &mut opts);
    }

    let org_path = std::path::absolute(&args.org).context("resolve org path")?;
    let mut org = OrgConnection::sqlite(&args.org_name, &org_path);
    if let Some(strict) = args.strict_schema {
        org.config
            .insert("strict_schema".to_string(), strict.to_string());
    }
    opts.org = org;
    opts.recipe = args.recipe.clone();
    opts.run_until = RunUntilOptions {
        recipe_repeated: args.run_until_recipe_repeated.clone(),
        records_loaded: args.run_until_records_loaded.clone(),
        records_in_org: args.run_until_records_in_org.clone(),
    };
    if args.working_directory.is_some() {
        opts.working_directory = args.working_directory.clone();
    }
    if let Some(debug) = args.debug {
        opts.keep_working_directory = debug;
    }
    if args.num_processes.is_some() {
        opts.num_generator_workers = args.num_processes;
    }
    if args.num_loaders.is_some() {
        opts.num_loader_workers = args.num_loaders;
    }
    if let Some(mode) = &args.bulk_mode {
        opts.bulk_mode = mode.parse()?;
    }
    if let Some(v) = args.ignore_row_errors {
        opts.ignore_row_errors = v;
    }
    if let Some(v) = args.drop_missing_schema {
        opts.drop_missing_schema = v;
    }
    if let Some(n) = args.error_threshold {
        opts.error_threshold = n;
    }
    if let Some(pairs) = &args.recipe_options {
        opts.recipe_options = parse_pairs(pairs)?;
    }
    if let Some(spawn) = &args.spawn {
        opts.generator_spawn = spawn.parse()?;
    }
    if let Some(v) = args.verbose {
        opts.verbose = v;
    }
    opts.connected_app = load_connected_app(&cwd);
    Ok(opts)
}

pub fn handle_run(args: &RunArgs) -> Result<()> {
    setup_logging(args.verbose.unwrap_or(false));
    let opts = setup_opts(args)?;
    let mut data_load = DataLoad::new(opts)?;

    let stop = data_load.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .context("set Ctrl+C handler")?;

    let summary = data_load.run()?;
    if let Some(because) = &summary.nothing_to_do {
        info!("Nothing to do: {because}");
    }
    if !summary.failed_job_dirs.is_empty() {
        warn!("{} jobs failed", summary.failed_job_dirs.len());
    }
    debug!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Worker process entry: logs go to stderr, which the controller shares.
pub fn handle_worker() -> Result<()> {
    setup_logging(false);
    run_worker_from_stdin(Arc::new(TaskRegistry::builtin()))
}

pub fn handle_cli(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Worker => handle_worker(),
    }
}
