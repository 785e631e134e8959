//! Task options for the generator and loader jobs, derived from each job's directory.
//!
//! Options the seed batch uses should usually change together with these.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pipeline::run_until::RunUntil;
use crate::queue::job_dir::count_from_name;
use crate::tasks::JobWorkingDirectory;
use crate::tasks::generate::COUNT_REPS;
use crate::{BulkMode, TaskOptions};

#[derive(Clone, Debug)]
pub struct SubtaskConfigurator {
    pub recipe: PathBuf,
    pub run_until: RunUntil,
    pub bulk_mode: BulkMode,
    pub recipe_options: BTreeMap<String, String>,
    pub ignore_row_errors: bool,
    pub drop_missing_schema: bool,
}

impl SubtaskConfigurator {
    /// Generate as many sets as the directory name says, continuing from the template's ids.
    pub fn data_generator_opts(&self, working_dir: &Path) -> Result<TaskOptions> {
        let name = working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let num_records = count_from_name(&name)
            .with_context(|| format!("job directory `{name}` carries no record count"))?;
        let wd = JobWorkingDirectory::new(working_dir);

        let mut options = TaskOptions::new()
            .with("generator_yaml", self.recipe.display().to_string())
            .with("num_records", num_records)
            .with(
                "num_records_tablename",
                self.run_until.sobject_name().unwrap_or(COUNT_REPS),
            )
            .with("database_url", wd.database_url())
            .with("vars", vars_value(&self.recipe_options));
        options.insert_path("working_directory", working_dir);
        let continuation = wd.continuation_file();
        if continuation.is_file() {
            options.insert_path("continuation_file", &continuation);
        }
        Ok(options)
    }

    /// Load the job database with the template's mapping. Ids from earlier jobs are kept.
    pub fn data_loader_opts(&self, working_dir: &Path) -> Result<TaskOptions> {
        let wd = JobWorkingDirectory::new(working_dir);
        let mut options = TaskOptions::new()
            .with("database_url", wd.database_url())
            .with("reset_oids", false)
            .with("bulk_mode", self.bulk_mode.to_string())
            .with("ignore_row_errors", self.ignore_row_errors)
            .with("drop_missing_schema", self.drop_missing_schema)
            .with("set_recently_viewed", false);
        options.insert_path("mapping", &wd.mapping_file());
        Ok(options)
    }
}

pub(crate) fn vars_value(vars: &BTreeMap<String, String>) -> Value {
    Value::Object(
        vars.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
