//! Load `.snowqueue.toml` from a directory (CLI only). Library callers build `LoadOpts` directly.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::LoadOpts;
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub struct SnowqueueToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    working_directory: Option<String>,
    num_processes: Option<usize>,
    num_loaders: Option<usize>,
    bulk_mode: Option<String>,
    ignore_row_errors: Option<bool>,
    drop_missing_schema: Option<bool>,
    min_portion_size: Option<u64>,
    max_portion_size: Option<u64>,
    growth_factor: Option<f64>,
    error_threshold: Option<usize>,
    /// Seconds.
    wait_time: Option<u64>,
    /// Seconds.
    org_poll_interval: Option<u64>,
    load_queue_size: Option<usize>,
    verbose: Option<bool>,
}

/// Load the settings file from `dir` if present. Returns None if missing or unreadable.
pub fn load_snowqueue_toml(dir: &Path) -> Option<SnowqueueToml> {
    let path = dir.join(PackagePaths::get().settings_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    toml::from_str(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $sec_field:ident => $opts_field:ident) => {
        if let Some(v) = $sec.$sec_field {
            $opts.$opts_field = v;
        }
    };
}

/// Apply file config to opts (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_opts(file: &SnowqueueToml, opts: &mut LoadOpts) {
    let sec = &file.settings;
    if let Some(ref p) = sec.working_directory {
        opts.working_directory = Some(PathBuf::from(p));
    }
    if sec.num_processes.is_some() {
        opts.num_generator_workers = sec.num_processes;
    }
    if sec.num_loaders.is_some() {
        opts.num_loader_workers = sec.num_loaders;
    }
    if let Some(ref mode) = sec.bulk_mode {
        match mode.parse() {
            Ok(m) => opts.bulk_mode = m,
            Err(e) => log::warn!("{}: {}", PackagePaths::get().settings_filename(), e),
        }
    }
    apply_file_opt!(sec, opts, ignore_row_errors => ignore_row_errors);
    apply_file_opt!(sec, opts, drop_missing_schema => drop_missing_schema);
    apply_file_opt!(sec, opts, min_portion_size => min_portion_size);
    apply_file_opt!(sec, opts, max_portion_size => max_portion_size);
    apply_file_opt!(sec, opts, growth_factor => growth_factor);
    apply_file_opt!(sec, opts, error_threshold => error_threshold);
    apply_file_opt!(sec, opts, load_queue_size => load_queue_size);
    apply_file_opt!(sec, opts, verbose => verbose);
    if let Some(secs) = sec.wait_time {
        opts.wait_time = Duration::from_secs(secs);
    }
    if let Some(secs) = sec.org_poll_interval {
        opts.org_poll_interval = Duration::from_secs(secs);
    }
}

/// Parse settings from a string (tests and callers that embed the file).
pub fn parse_snowqueue_toml(s: &str) -> anyhow::Result<SnowqueueToml> {
    Ok(toml::from_str(s)?)
}
