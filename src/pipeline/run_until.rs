//! When to stop generating: a number of recipe repetitions, a number of records loaded by this
//! run, or a total number of records in the org.

use anyhow::Result;
use log::debug;

use crate::RunUntilOptions;
use crate::errors::PipelineError;
use crate::org::RecordCounter;
use crate::types::parse_count;

pub const RECIPE_REPEATED_OPTION: &str = "--run-until-recipe-repeated";
pub const RECORDS_LOADED_OPTION: &str = "--run-until-records-loaded";
pub const RECORDS_IN_ORG_OPTION: &str = "--run-until-records-in-org";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunUntil {
    /// Run the recipe `target` times.
    RecipeRepeated { target: u64 },
    /// Load `target` new `sobject` records during this run.
    RecordsLoaded { sobject: String, target: u64 },
    /// Stop once the org holds `target` `sobject` records. `in_org_count` is the count when the
    /// run started.
    RecordsInOrg {
        sobject: String,
        target: u64,
        in_org_count: u64,
    },
}

impl RunUntil {
    pub fn target(&self) -> u64 {
        match self {
            RunUntil::RecipeRepeated { target }
            | RunUntil::RecordsLoaded { target, .. }
            | RunUntil::RecordsInOrg { target, .. } => *target,
        }
    }

    /// Sets this run must still produce.
    pub fn gap(&self) -> u64 {
        match self {
            RunUntil::RecordsInOrg {
                target,
                in_org_count,
                ..
            } => target.saturating_sub(*in_org_count),
            other => other.target(),
        }
    }

    /// Object whose count decides when to stop; `None` for plain repetitions.
    pub fn sobject_name(&self) -> Option<&str> {
        match self {
            RunUntil::RecipeRepeated { .. } => None,
            RunUntil::RecordsLoaded { sobject, .. } | RunUntil::RecordsInOrg { sobject, .. } => {
                Some(sobject)
            }
        }
    }

    pub fn nothing_to_do(&self) -> bool {
        self.gap() == 0
    }

    pub fn nothing_to_do_because(&self) -> String {
        match self {
            RunUntil::RecipeRepeated { .. } => "You asked for zero repetitions.".to_string(),
            RunUntil::RecordsLoaded { .. } => "You asked for zero records.".to_string(),
            RunUntil::RecordsInOrg {
                sobject,
                target,
                in_org_count,
            } => format!("The org has {in_org_count} {sobject} records. You asked for {target}"),
        }
    }
}

/// `<object>:<count>` or `<object>,<count>`.
fn split_pair(param: &str, option_name: &str) -> Result<(String, u64), PipelineError> {
    let parts: Vec<&str> = param.split([':', ',']).collect();
    let [sobject, count] = parts.as_slice() else {
        return Err(PipelineError::options(format!(
            "{param} is in the wrong format for {option_name}"
        )));
    };
    let sobject = sobject.trim();
    if sobject.is_empty() {
        return Err(PipelineError::options(format!(
            "{param} is in the wrong format for {option_name}"
        )));
    }
    Ok((sobject.to_string(), parse_count(count)?))
}

fn selected(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Pick and parse the one selected strategy. With none selected the recipe runs once.
///
/// The in-org strategy asks `org` for its current count, once.
pub fn determine_run_until(options: &RunUntilOptions, org: &dyn RecordCounter) -> Result<RunUntil> {
    let choices = [
        selected(&options.recipe_repeated).map(|v| (RECIPE_REPEATED_OPTION, v)),
        selected(&options.records_loaded).map(|v| (RECORDS_LOADED_OPTION, v)),
        selected(&options.records_in_org).map(|v| (RECORDS_IN_ORG_OPTION, v)),
    ];
    let chosen: Vec<(&str, &str)> = choices.into_iter().flatten().collect();
    if chosen.len() > 1 {
        return Err(PipelineError::options(
            "Please select only one of run_until_recipe_repeated, run_until_records_loaded, run_until_records_in_org",
        )
        .into());
    }

    let run_until = match chosen.first() {
        None => RunUntil::RecipeRepeated { target: 1 },
        Some((RECIPE_REPEATED_OPTION, value)) => RunUntil::RecipeRepeated {
            target: parse_count(value)?,
        },
        Some((RECORDS_LOADED_OPTION, value)) => {
            let (sobject, target) = split_pair(value, RECORDS_LOADED_OPTION)?;
            RunUntil::RecordsLoaded { sobject, target }
        }
        Some((option_name, value)) => {
            let (sobject, target) = split_pair(value, option_name)?;
            let in_org_count = org.count_records(&sobject)?;
            RunUntil::RecordsInOrg {
                sobject,
                target,
                in_org_count,
            }
        }
    };
    debug!("Run until: {run_until:?}");
    Ok(run_until)
}
