//! Table introspection and DDL. Identifiers come from recipes, so they are validated and quoted.

use anyhow::{Context, Result, bail};
use rusqlite::Connection;

/// Tables mapping a job's local ids to org ids are named `<Object>_sf_ids`.
pub const SF_IDS_SUFFIX: &str = "_sf_ids";

pub fn sf_ids_table(sobject: &str) -> String {
    format!("{sobject}{SF_IDS_SUFFIX}")
}

/// ASCII letters, digits and `_`, not starting with a digit.
pub fn validate_ident(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !ok {
        bail!("`{name}` is not a valid object or field name");
    }
    Ok(())
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .with_context(|| format!("look up table {table}"))?;
    Ok(n > 0)
}

pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row?);
    }
    Ok(names)
}

/// Column names in table order. Empty when the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut cols = Vec::new();
    for row in rows {
        cols.push(row?);
    }
    Ok(cols)
}

/// `CREATE TABLE IF NOT EXISTS` with an integer key and TEXT columns.
pub fn create_table(
    conn: &Connection,
    table: &str,
    key: &str,
    autoincrement: bool,
    columns: &[String],
) -> Result<()> {
    validate_ident(table)?;
    let mut defs = vec![format!(
        "{} INTEGER PRIMARY KEY{}",
        quote_ident(key),
        if autoincrement { " AUTOINCREMENT" } else { "" }
    )];
    for col in columns {
        validate_ident(col)?;
        defs.push(format!("{} TEXT", quote_ident(col)));
    }
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        defs.join(", ")
    );
    conn.execute_batch(&sql)
        .with_context(|| format!("create table {table}"))?;
    Ok(())
}

/// Add the TEXT columns of `columns` that `table` lacks. Returns the added names.
pub fn add_missing_columns(
    conn: &Connection,
    table: &str,
    columns: &[String],
) -> Result<Vec<String>> {
    let existing = table_columns(conn, table)?;
    let mut added = Vec::new();
    for col in columns {
        if existing.iter().any(|c| c == col) {
            continue;
        }
        validate_ident(col)?;
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            quote_ident(table),
            quote_ident(col)
        );
        conn.execute_batch(&sql)
            .with_context(|| format!("add column {table}.{col}"))?;
        added.push(col.clone());
    }
    Ok(added)
}

/// Row count; 0 when the table does not exist.
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let n: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("count rows in {table}"))?;
    Ok(n.max(0) as u64)
}

pub fn drop_tables(conn: &Connection, tables: &[String]) -> Result<()> {
    for table in tables {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
        conn.execute_batch(&sql)
            .with_context(|| format!("drop table {table}"))?;
    }
    Ok(())
}
