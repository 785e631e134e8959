//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    settings_filename: String,
    env_prefix: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                settings_filename: format!(".{pkg}.toml"),
                env_prefix: pkg.to_uppercase(),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn settings_filename(&self) -> &str {
        &self.settings_filename
    }

    /// Environment variable name for `suffix`, e.g. `SNOWQUEUE_CLIENT_ID`.
    pub fn env_var(&self, suffix: &str) -> String {
        format!("{}_{}", self.env_prefix, suffix)
    }
}

// ---- Job directory layout ----

/// File and directory names that make up the on-disk protocol between queues and workers.
pub struct JobFiles;

impl JobFiles {
    pub const FAILURES_DIR: &'static str = "failures";
    pub const EXCEPTION_FILE: &'static str = "exception.txt";
    pub const RESULTS_FILE: &'static str = "results.json";
    pub const OPTIONS_FILE: &'static str = "options.json";
    pub const TEMPLATE_DIR: &'static str = "template_1";
    pub const STAGING_DIR: &'static str = "staging";
    pub const DATABASE_FILE: &'static str = "generated_data.db";
    pub const MAPPING_FILE: &'static str = "temp_mapping.json";
    pub const CONTINUATION_FILE: &'static str = "continuation.json";
}

// ---- Portions ----

/// A portion is what other systems call a batch. Portions start small so the loaders are
/// engaged early, then grow toward the max.
pub struct PortionConsts;

impl PortionConsts {
    pub const MIN_PORTION_SIZE: u64 = 2_000;
    pub const MAX_PORTION_SIZE: u64 = 250_000;
    pub const GROWTH_FACTOR: f64 = 1.1;
}

// ---- Queues ----

pub struct QueueConsts;

impl QueueConsts {
    /// Portions allowed on disk waiting to be loaded. Higher numbers use more disk space.
    pub const LOAD_QUEUE_SIZE: usize = 15;
    /// Generated portions never wait: a generator only starts when a slot is free.
    pub const DATA_GEN_QUEUE_SIZE: usize = 0;
    /// Loaders spend most of their time waiting on the org, so there are more of them.
    pub const WORKER_TO_LOADER_RATIO: usize = 4;
    pub const DATA_GEN_QUEUE_NAME: &'static str = "data_gen";
    pub const DATA_LOAD_QUEUE_NAME: &'static str = "data_load";
}

// ---- Driver loop ----

/// Pause between controller ticks. Trade-off between busy-waiting and latency.
pub const WAIT_TIME: Duration = Duration::from_secs(3);

/// Pause between org record count polls.
pub const ORG_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Failed portions tolerated before the run aborts.
pub const ERROR_THRESHOLD: usize = 0;

/// Ticks between repeated "waiting for N uploads" messages while draining.
pub const FINISH_MESSAGE_COOLDOWN: u32 = 5;

// ---- SQLite ----

/// Wait this long on a locked database before giving up (loaders share the org file).
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Rows per insert transaction in the generation and load subtasks.
pub const DB_INSERT_BATCH_SIZE: usize = 1000;
