//! Reference load subtask: copy a job database into the org, step by step.
//!
//! Lookup columns hold local ids; they are translated to org ids through the job database's
//! `<Object>_sf_ids` tables, which this task fills as it inserts. A lookup that cannot be
//! translated is a row error.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::engine::db_ops::{
    create_table, open_db_url, quote_ident, sf_ids_table, table_columns, table_exists,
};
use crate::errors::PipelineError;
use crate::org::{OrgClient, connect};
use crate::queue::CONNECTED_APP_SERVICE;
use crate::tasks::generate::LOCAL_ID_FIELD;
use crate::tasks::mapping::{Mapping, MappingStep};
use crate::tasks::{Task, TaskContext};
use crate::utils::config::DB_INSERT_BATCH_SIZE;
use crate::{BulkMode, LoadResults, StepResult, StepStatus, TaskOptions};

const SF_ID_FIELD: &str = "sf_id";

pub struct LoadData {
    mapping: PathBuf,
    database_url: String,
    reset_oids: bool,
    bulk_mode: BulkMode,
    ignore_row_errors: bool,
    drop_missing_schema: bool,
}

impl LoadData {
    pub fn from_options(options: &TaskOptions) -> Result<Self> {
        let bulk_mode = match options.get_str("bulk_mode") {
            Some(s) => s.parse()?,
            None => BulkMode::default(),
        };
        Ok(Self {
            mapping: options.require_path("mapping")?,
            database_url: options.require_str("database_url")?.to_string(),
            reset_oids: options.get_bool("reset_oids")?.unwrap_or(true),
            bulk_mode,
            ignore_row_errors: options.get_bool("ignore_row_errors")?.unwrap_or(false),
            drop_missing_schema: options.get_bool("drop_missing_schema")?.unwrap_or(false),
        })
    }
}

impl Task for LoadData {
    fn run(&mut self, ctx: &TaskContext<'_>) -> Result<Option<Value>> {
        match ctx.keychain.get_service(CONNECTED_APP_SERVICE) {
            Ok(app) => ctx.log.info(format!("Using connected app {}", app.client_id)),
            Err(_) => ctx.log.info("No connected app; using org connection as given"),
        }
        let mapping = Mapping::load(&self.mapping)?;
        let mut conn = open_db_url(&self.database_url)?;
        let mut org = connect(ctx.org)?;
        ctx.log.info(format!(
            "Loading {} steps into org `{}` ({} mode)",
            mapping.steps.len(),
            ctx.org.name,
            self.bulk_mode
        ));

        if self.reset_oids {
            for step in &mapping.steps {
                let table = sf_ids_table(&step.sobject);
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&table)))
                    .with_context(|| format!("reset {table}"))?;
            }
        }

        let mut results = LoadResults::default();
        for step in &mapping.steps {
            let result = self.load_step(ctx, &mut conn, org.as_mut(), step)?;
            ctx.log.info(format!(
                "{}: {} processed, {} row errors",
                step.name(),
                result.records_processed,
                result.total_row_errors
            ));
            results.step_results.insert(step.name(), result);
        }
        Ok(Some(serde_json::to_value(&results)?))
    }
}

impl LoadData {
    /// Columns of `step` the org can take, creating schema when the org allows it.
    fn prepare_schema(
        &self,
        ctx: &TaskContext<'_>,
        org: &mut dyn OrgClient,
        step: &MappingStep,
    ) -> Result<Option<Vec<String>>> {
        let wanted = step.columns();
        let existing = org.describe(&step.sobject)?;
        if org.allows_schema_changes() {
            org.create_fields(&step.sobject, &wanted)?;
            return Ok(Some(wanted));
        }
        let Some(existing) = existing else {
            if self.drop_missing_schema {
                ctx.log.warn(format!("Skipping {}: not in the org", step.sobject));
                return Ok(None);
            }
            return Err(PipelineError::BulkData(format!(
                "Object `{}` does not exist in the org",
                step.sobject
            ))
            .into());
        };
        let (present, missing): (Vec<String>, Vec<String>) =
            wanted.into_iter().partition(|c| existing.contains(c));
        if !missing.is_empty() {
            if !self.drop_missing_schema {
                return Err(PipelineError::BulkData(format!(
                    "Fields missing from {} in the org: {}",
                    step.sobject,
                    missing.join(", ")
                ))
                .into());
            }
            ctx.log.warn(format!(
                "Dropping fields missing from {}: {}",
                step.sobject,
                missing.join(", ")
            ));
        }
        Ok(Some(present))
    }

    fn load_step(
        &self,
        ctx: &TaskContext<'_>,
        conn: &mut Connection,
        org: &mut dyn OrgClient,
        step: &MappingStep,
    ) -> Result<StepResult> {
        let mut result = StepResult {
            sobject: step.sobject.clone(),
            status: StepStatus::Success,
            records_processed: 0,
            total_row_errors: 0,
        };
        if !table_exists(conn, &step.table)? {
            return Ok(result);
        }
        let Some(columns) = self.prepare_schema(ctx, org, step)? else {
            return Ok(result);
        };
        let local_columns = table_columns(conn, &step.table)?;
        let columns: Vec<String> = columns
            .into_iter()
            .filter(|c| local_columns.contains(c))
            .collect();

        let ids_table = sf_ids_table(&step.sobject);
        create_table(conn, &ids_table, LOCAL_ID_FIELD, false, &[SF_ID_FIELD.to_string()])?;

        let mut lookups = self.lookup_maps(conn, step)?;
        let rows = read_pending_rows(conn, step, &columns, &ids_table)?;

        // A row may point at the previous row of its own object, which must be in the org first.
        let self_lookups: Vec<String> = step
            .lookups
            .iter()
            .filter(|(_, target)| **target == step.sobject)
            .map(|(field, _)| field.clone())
            .collect();
        let chunk_size = if self_lookups.is_empty() {
            DB_INSERT_BATCH_SIZE
        } else {
            1
        };

        let mut first_error: Option<String> = None;
        for chunk in rows.chunks(chunk_size) {
            let mut ready: Vec<(i64, Vec<Option<String>>)> = Vec::with_capacity(chunk.len());
            for (local_id, values) in chunk {
                match translate_lookups(step, &columns, values, &lookups) {
                    Ok(values) => ready.push((*local_id, values)),
                    Err(msg) => {
                        result.total_row_errors += 1;
                        first_error
                            .get_or_insert_with(|| format!("record with id {local_id}: {msg}"));
                    }
                }
            }
            let values: Vec<Vec<Option<String>>> = ready.iter().map(|(_, v)| v.clone()).collect();
            let outcomes = org.insert_rows(&step.sobject, &columns, &values)?;
            let mut inserted: Vec<(i64, String)> = Vec::with_capacity(outcomes.len());
            for ((local_id, _), outcome) in ready.iter().zip(outcomes) {
                match outcome {
                    Ok(sf_id) => inserted.push((*local_id, sf_id)),
                    Err(msg) => {
                        result.total_row_errors += 1;
                        first_error
                            .get_or_insert_with(|| format!("record with id {local_id}: {msg}"));
                    }
                }
            }
            record_sf_ids(conn, &ids_table, &inserted)?;
            for field in &self_lookups {
                if let Some(ids) = lookups.get_mut(field) {
                    for (local_id, sf_id) in &inserted {
                        ids.insert(local_id.to_string(), sf_id.clone());
                    }
                }
            }
            result.records_processed += chunk.len() as u64;
        }

        if result.total_row_errors > 0 {
            result.status = StepStatus::Failure;
            if !self.ignore_row_errors
                && let Some(msg) = first_error
            {
                return Err(PipelineError::BulkData(format!(
                    "{}: {} row errors, first on {msg}",
                    step.name(),
                    result.total_row_errors
                ))
                .into());
            }
        }
        Ok(result)
    }

    /// Lookup field -> (local id -> org id), from the target's id-mapping table.
    fn lookup_maps(
        &self,
        conn: &Connection,
        step: &MappingStep,
    ) -> Result<HashMap<String, HashMap<String, String>>> {
        let mut maps = HashMap::new();
        for (field, target) in &step.lookups {
            let table = sf_ids_table(target);
            let mut ids = HashMap::new();
            if table_exists(conn, &table)? {
                let sql = format!(
                    "SELECT {}, {} FROM {}",
                    quote_ident(LOCAL_ID_FIELD),
                    quote_ident(SF_ID_FIELD),
                    quote_ident(&table)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (local, sf_id) = row?;
                    ids.insert(local.to_string(), sf_id);
                }
            }
            maps.insert(field.clone(), ids);
        }
        Ok(maps)
    }
}

/// Rows of the step's table that have no org id yet, ordered by local id.
fn read_pending_rows(
    conn: &Connection,
    step: &MappingStep,
    columns: &[String],
    ids_table: &str,
) -> Result<Vec<(i64, Vec<Option<String>>)>> {
    let mut select = vec![format!("t.{}", quote_ident(LOCAL_ID_FIELD))];
    select.extend(columns.iter().map(|c| format!("t.{}", quote_ident(c))));
    let sql = format!(
        "SELECT {} FROM {} t WHERE t.{id} NOT IN (SELECT {id} FROM {}) ORDER BY t.{id}",
        select.join(", "),
        quote_ident(&step.table),
        quote_ident(ids_table),
        id = quote_ident(LOCAL_ID_FIELD),
    );
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("read {}", step.table))?;
    let n = columns.len();
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let mut values = Vec::with_capacity(n);
        for i in 0..n {
            values.push(row.get::<_, Option<String>>(i + 1)?);
        }
        Ok((id, values))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn translate_lookups(
    step: &MappingStep,
    columns: &[String],
    values: &[Option<String>],
    lookups: &HashMap<String, HashMap<String, String>>,
) -> std::result::Result<Vec<Option<String>>, String> {
    let mut out = Vec::with_capacity(values.len());
    for (column, value) in columns.iter().zip(values) {
        let translated = match (lookups.get(column), value) {
            (Some(ids), Some(local)) => match ids.get(local) {
                Some(sf_id) => Some(sf_id.clone()),
                None => {
                    let target = step.lookups.get(column).map(String::as_str).unwrap_or("?");
                    return Err(format!("{column} -> {target} {local} was not loaded"));
                }
            },
            _ => value.clone(),
        };
        out.push(translated);
    }
    Ok(out)
}

fn record_sf_ids(conn: &mut Connection, ids_table: &str, inserted: &[(i64, String)]) -> Result<()> {
    if inserted.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}, {}) VALUES (?1, ?2)",
        quote_ident(ids_table),
        quote_ident(LOCAL_ID_FIELD),
        quote_ident(SF_ID_FIELD)
    );
    let tx = conn.transaction().context("begin transaction")?;
    {
        let mut stmt = tx.prepare(&sql)?;
        for (local_id, sf_id) in inserted {
            stmt.execute((local_id, sf_id))
                .with_context(|| format!("record id mapping in {ids_table}"))?;
        }
    }
    tx.commit().context("commit transaction")?;
    Ok(())
}
