//! The target system ("org"): where loaded records end up and where run-until counts come from.
//!
//! The pipeline only needs two capabilities: count records of an object, and insert rows.
//! [`SqliteOrg`] implements them over a local SQLite file, one table per object with an
//! autoincrement `Id`. With `strict_schema` set in the connection config the org refuses to
//! grow new objects or fields, which is what `drop_missing_schema` is for.

use anyhow::{Context, Result, bail};
use log::debug;
use rusqlite::{Connection, TransactionBehavior};

use crate::OrgConnection;
use crate::engine::db_ops::{
    add_missing_columns, count_rows, create_table, open_db, quote_ident, table_columns,
    table_exists, validate_ident,
};
use crate::types::parse_bool;

/// Org id assigned to an inserted row, or the row's error message.
pub type RowOutcome = std::result::Result<String, String>;

/// Primary key column of every org table.
pub const ORG_ID_FIELD: &str = "Id";

pub trait RecordCounter {
    /// Records of `sobject` in the org; 0 when the object does not exist yet.
    fn count_records(&self, sobject: &str) -> Result<u64>;
}

pub trait OrgClient: RecordCounter {
    /// Field names of `sobject` (without `Id`), or `None` when the org has no such object.
    fn describe(&self, sobject: &str) -> Result<Option<Vec<String>>>;

    /// Whether missing objects and fields may be created on demand.
    fn allows_schema_changes(&self) -> bool;

    /// Create `sobject` if missing and add any of `fields` it lacks.
    fn create_fields(&mut self, sobject: &str, fields: &[String]) -> Result<()>;

    /// Insert `rows` (values in `columns` order). One outcome per row, in order.
    fn insert_rows(
        &mut self,
        sobject: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<Vec<RowOutcome>>;
}

/// Open a client for `org` based on its `kind`.
pub fn connect(org: &OrgConnection) -> Result<Box<dyn OrgClient>> {
    match org.kind.as_str() {
        OrgConnection::SQLITE => Ok(Box::new(SqliteOrg::open(org)?)),
        other => bail!("Unsupported org kind `{other}` for org `{}`", org.name),
    }
}

pub struct SqliteOrg {
    conn: Connection,
    strict: bool,
}

impl SqliteOrg {
    pub fn open(org: &OrgConnection) -> Result<Self> {
        let path = org
            .database_path()
            .with_context(|| format!("org `{}` has no database configured", org.name))?;
        let strict = match org.config.get("strict_schema") {
            Some(v) => parse_bool(v)?,
            None => false,
        };
        let conn = open_db(&path)?;
        debug!("Opened org `{}` at {}", org.name, path.display());
        Ok(Self { conn, strict })
    }
}

impl RecordCounter for SqliteOrg {
    fn count_records(&self, sobject: &str) -> Result<u64> {
        validate_ident(sobject)?;
        count_rows(&self.conn, sobject)
    }
}

impl OrgClient for SqliteOrg {
    fn describe(&self, sobject: &str) -> Result<Option<Vec<String>>> {
        validate_ident(sobject)?;
        if !table_exists(&self.conn, sobject)? {
            return Ok(None);
        }
        let fields = table_columns(&self.conn, sobject)?
            .into_iter()
            .filter(|c| c != ORG_ID_FIELD)
            .collect();
        Ok(Some(fields))
    }

    fn allows_schema_changes(&self) -> bool {
        !self.strict
    }

    fn create_fields(&mut self, sobject: &str, fields: &[String]) -> Result<()> {
        if self.strict {
            bail!("Org schema is read-only; cannot create {sobject}");
        }
        // Loaders share the org file; take the write lock before looking at the schema.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin schema transaction")?;
        create_table(&tx, sobject, ORG_ID_FIELD, true, fields)?;
        add_missing_columns(&tx, sobject, fields)?;
        tx.commit().context("commit schema changes")?;
        Ok(())
    }

    fn insert_rows(
        &mut self,
        sobject: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<Vec<RowOutcome>> {
        validate_ident(sobject)?;
        for col in columns {
            validate_ident(col)?;
        }
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(sobject))
        } else {
            let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let params: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(sobject),
                cols.join(", "),
                params.join(", ")
            )
        };

        let tx = self.conn.transaction().context("begin transaction")?;
        let mut outcomes = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx
                .prepare(&sql)
                .with_context(|| format!("prepare insert into {sobject}"))?;
            for row in rows {
                let outcome = match stmt.execute(rusqlite::params_from_iter(row.iter())) {
                    Ok(_) => Ok(tx.last_insert_rowid().to_string()),
                    Err(e) => Err(e.to_string()),
                };
                outcomes.push(outcome);
            }
        }
        tx.commit().context("commit transaction")?;
        Ok(outcomes)
    }
}
