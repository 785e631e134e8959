//! Reference generation subtask: run a recipe into a job database.

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::TaskOptions;
use crate::engine::db_ops::{add_missing_columns, create_table, open_db_url, quote_ident};
use crate::tasks::mapping::Mapping;
use crate::tasks::recipe::{FieldValue, ObjectTemplate, Recipe, field_value, render};
use crate::tasks::{Task, TaskContext};
use crate::utils::config::DB_INSERT_BATCH_SIZE;

/// `num_records_tablename` meaning "count recipe iterations, not rows".
pub const COUNT_REPS: &str = "__count_reps__";

/// Local id column of every job-database data table.
pub const LOCAL_ID_FIELD: &str = "id";

/// State carried from the first batch to every later one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    /// Next local id per object.
    pub next_ids: BTreeMap<String, u64>,
    /// Local id of the last `just_once` row per object.
    pub just_once_ids: BTreeMap<String, u64>,
    /// Iterations run so far.
    pub iterations: u64,
}

impl Continuation {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read continuation {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse continuation {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("write continuation {}", path.display()))
    }
}

pub struct GenerateData {
    recipe: PathBuf,
    num_records: u64,
    num_records_tablename: String,
    database_url: String,
    continuation_file: Option<PathBuf>,
    generate_continuation_file: Option<PathBuf>,
    generate_mapping_file: Option<PathBuf>,
    vars: BTreeMap<String, String>,
}

impl GenerateData {
    pub fn from_options(options: &TaskOptions) -> Result<Self> {
        Ok(Self {
            recipe: options.require_path("generator_yaml")?,
            num_records: options.get_u64("num_records")?.unwrap_or(1),
            num_records_tablename: options
                .get_str("num_records_tablename")
                .unwrap_or(COUNT_REPS)
                .to_string(),
            database_url: options.require_str("database_url")?.to_string(),
            continuation_file: options.get_path("continuation_file"),
            generate_continuation_file: options.get_path("generate_continuation_file"),
            generate_mapping_file: options.get_path("generate_mapping_file"),
            vars: options.get_string_map("vars")?,
        })
    }
}

impl Task for GenerateData {
    fn run(&mut self, ctx: &TaskContext<'_>) -> Result<Option<Value>> {
        let recipe = Recipe::load(&self.recipe)?;
        let vars = recipe.resolve_vars(&self.vars)?;
        let continuation = match &self.continuation_file {
            Some(path) => Continuation::load(path)?,
            None => Continuation::default(),
        };
        let first_batch = self.continuation_file.is_none();

        let counting_reps = self.num_records_tablename == COUNT_REPS;
        if !counting_reps && !recipe.object_names().contains(&self.num_records_tablename.as_str())
        {
            bail!(
                "`{}` is not generated by recipe `{}`",
                self.num_records_tablename,
                self.recipe.display()
            );
        }

        let mapping = Mapping::from_recipe(&recipe);
        let mut conn = open_db_url(&self.database_url)?;
        let mut tables = BTreeMap::new();
        for step in &mapping.steps {
            let columns = step.columns();
            create_table(&conn, &step.table, LOCAL_ID_FIELD, false, &columns)?;
            add_missing_columns(&conn, &step.table, &columns)?;
            tables.insert(step.sobject.clone(), TableBuffer::new(&step.table, columns));
        }

        ctx.log.info(format!(
            "Generating {} {} from {}",
            self.num_records,
            if counting_reps {
                "iterations"
            } else {
                self.num_records_tablename.as_str()
            },
            self.recipe.display()
        ));

        let mut generator = Generator::new(&continuation, &vars);
        let mut iteration = 0u64;
        loop {
            let done = if counting_reps {
                iteration >= self.num_records
            } else {
                generator.produced(&self.num_records_tablename) >= self.num_records
            };
            if done {
                break;
            }
            let before = generator.produced(&self.num_records_tablename);
            let include_just_once = first_batch && iteration == 0;
            generator.iteration(&recipe, include_just_once, &mut tables)?;
            if !counting_reps && generator.produced(&self.num_records_tablename) == before {
                bail!(
                    "Recipe never repeats `{}`; cannot generate {} of them",
                    self.num_records_tablename,
                    self.num_records
                );
            }
            iteration += 1;
            for buffer in tables.values_mut() {
                if buffer.rows.len() >= DB_INSERT_BATCH_SIZE {
                    buffer.flush(&mut conn)?;
                }
            }
        }
        for buffer in tables.values_mut() {
            buffer.flush(&mut conn)?;
        }

        if let Some(path) = &self.generate_mapping_file {
            mapping.save(path)?;
        }
        if let Some(path) = &self.generate_continuation_file {
            generator.continuation(continuation.iterations + iteration).save(path)?;
        }

        ctx.log.info(format!("Generated {iteration} iterations: {:?}", generator.produced));
        Ok(Some(json!({
            "iterations": iteration,
            "record_counts": generator.produced,
        })))
    }
}

/// Rows waiting to be written to one job-database table.
struct TableBuffer {
    table: String,
    columns: Vec<String>,
    rows: Vec<(u64, Vec<Option<String>>)>,
}

impl TableBuffer {
    fn new(table: &str, columns: Vec<String>) -> Self {
        Self {
            table: table.to_string(),
            columns,
            rows: Vec::new(),
        }
    }

    fn insert_sql(&self) -> String {
        let mut cols = vec![quote_ident(LOCAL_ID_FIELD)];
        cols.extend(self.columns.iter().map(|c| quote_ident(c)));
        let params: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            cols.join(", "),
            params.join(", ")
        )
    }

    /// Insert buffered rows in one transaction.
    fn flush(&mut self, conn: &mut Connection) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let sql = self.insert_sql();
        let tx = conn.transaction().context("begin transaction")?;
        {
            let mut stmt = tx.prepare(&sql).context("prepare insert")?;
            for (id, values) in &self.rows {
                let mut params: Vec<Option<String>> = Vec::with_capacity(values.len() + 1);
                params.push(Some(id.to_string()));
                params.extend(values.iter().cloned());
                stmt.execute(rusqlite::params_from_iter(params.iter()))
                    .with_context(|| format!("insert into {}", self.table))?;
            }
        }
        tx.commit().context("commit transaction")?;
        self.rows.clear();
        Ok(())
    }
}

struct Generator<'a> {
    vars: &'a BTreeMap<String, String>,
    next_ids: BTreeMap<String, u64>,
    last_ids: BTreeMap<String, u64>,
    just_once_ids: BTreeMap<String, u64>,
    produced: BTreeMap<String, u64>,
    base_iteration: u64,
    iterations: u64,
}

impl<'a> Generator<'a> {
    fn new(continuation: &Continuation, vars: &'a BTreeMap<String, String>) -> Self {
        Self {
            vars,
            next_ids: continuation.next_ids.clone(),
            last_ids: continuation.just_once_ids.clone(),
            just_once_ids: continuation.just_once_ids.clone(),
            produced: BTreeMap::new(),
            base_iteration: continuation.iterations,
            iterations: 0,
        }
    }

    fn produced(&self, name: &str) -> u64 {
        self.produced.get(name).copied().unwrap_or(0)
    }

    fn iteration(
        &mut self,
        recipe: &Recipe,
        include_just_once: bool,
        tables: &mut BTreeMap<String, TableBuffer>,
    ) -> Result<()> {
        let iteration_number = self.base_iteration + self.iterations + 1;
        for obj in &recipe.objects {
            if obj.just_once && !include_just_once {
                continue;
            }
            let buffer = tables
                .get_mut(&obj.name)
                .with_context(|| format!("no table for {}", obj.name))?;
            for _ in 0..obj.count {
                let row = self.row(obj, &buffer.columns, iteration_number)?;
                buffer.rows.push(row);
            }
        }
        self.iterations += 1;
        Ok(())
    }

    fn row(
        &mut self,
        obj: &ObjectTemplate,
        columns: &[String],
        iteration: u64,
    ) -> Result<(u64, Vec<Option<String>>)> {
        let next = self.next_ids.entry(obj.name.clone()).or_insert(1);
        let id = *next;
        *next += 1;

        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            let value = match obj.fields.get(column).map(|raw| field_value(raw)) {
                None => None,
                Some(FieldValue::Template(t)) => Some(render(t, id, iteration, self.vars)?),
                Some(FieldValue::Reference(target)) => {
                    let target_id = self.last_ids.get(target).with_context(|| {
                        format!(
                            "{}.{column} refers to `{target}` before any was generated",
                            obj.name
                        )
                    })?;
                    Some(target_id.to_string())
                }
            };
            values.push(value);
        }

        self.last_ids.insert(obj.name.clone(), id);
        if obj.just_once {
            self.just_once_ids.insert(obj.name.clone(), id);
        }
        *self.produced.entry(obj.name.clone()).or_insert(0) += 1;
        Ok((id, values))
    }

    fn continuation(&self, iterations: u64) -> Continuation {
        Continuation {
            next_ids: self.next_ids.clone(),
            just_once_ids: self.just_once_ids.clone(),
            iterations,
        }
    }
}
