use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::PipelineError;

struct DefaultArgs;

impl DefaultArgs {
    pub const ORG_NAME: &'static str = "default";
}

/// Generate record sets from a recipe in parallel and load them into an org.
#[derive(Clone, Parser)]
#[command(name = "snowqueue")]
#[command(about = "Generate data with worker pools and load it through directory-backed queues.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Run a data load.
    Run(RunArgs),
    /// Run one job from a worker config on stdin (used by process workers).
    #[command(hide = true)]
    Worker,
}

#[derive(Clone, Args)]
pub struct RunArgs {
    /// Recipe file (TOML) describing the records to generate.
    #[arg(long, short = 'r')]
    pub recipe: PathBuf,

    /// SQLite file standing in for the target org. Created if missing.
    #[arg(long)]
    pub org: PathBuf,

    /// Name of the org in logs.
    #[arg(long, default_value = DefaultArgs::ORG_NAME)]
    pub org_name: String,

    /// Refuse to create objects or fields in the org.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict_schema: Option<bool>,

    /// Run the recipe <count> times, no matter what is already in the org.
    #[arg(long, value_name = "COUNT")]
    pub run_until_recipe_repeated: Option<String>,

    /// <sobject>:<count>. Stop once this run has loaded <count> <sobject> records.
    #[arg(long, value_name = "SOBJECT:COUNT")]
    pub run_until_records_loaded: Option<String>,

    /// <sobject>:<count>. Stop once the org holds <count> <sobject> records.
    #[arg(long, value_name = "SOBJECT:COUNT")]
    pub run_until_records_in_org: Option<String>,

    /// Path for working files. Must not exist yet. Default: a temporary directory.
    #[arg(long, short = 'w')]
    pub working_directory: Option<PathBuf>,

    /// Keep the temporary working directory after the run.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub debug: Option<bool>,

    /// Data generating workers. Default: number of physical cores.
    #[arg(long, short = 'p')]
    pub num_processes: Option<usize>,

    /// Loading workers. Default: four per generating worker.
    #[arg(long)]
    pub num_loaders: Option<usize>,

    /// Serial or Parallel. Serial runs one generator and one loader.
    #[arg(long)]
    pub bulk_mode: Option<String>,

    /// Continue loading after row errors.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub ignore_row_errors: Option<bool>,

    /// Skip objects and fields missing from the org instead of failing.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub drop_missing_schema: Option<bool>,

    /// Failed portions tolerated before the run aborts.
    #[arg(long)]
    pub error_threshold: Option<usize>,

    /// Recipe variables: VAR1:foo,VAR2:bar
    #[arg(long)]
    pub recipe_options: Option<String>,

    /// How generator workers run: thread or process.
    #[arg(long)]
    pub spawn: Option<String>,

    /// Verbose output and a progress bar.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

/// Parse `k1:v1,k2:v2` (or `k=v`) into a map.
pub fn parse_pairs(s: &str) -> Result<BTreeMap<String, String>, PipelineError> {
    let mut out = BTreeMap::new();
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once([':', '=']) else {
            return Err(PipelineError::options(format!(
                "Var:value pair not correct. Must be in the format var:value, got `{pair}`"
            )));
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}
