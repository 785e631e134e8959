//! Open SQLite databases (job databases and the org file).

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::utils::config::SQLITE_BUSY_TIMEOUT;

use super::WAL_PRAGMAS;

const SQLITE_URL_PREFIX: &str = "sqlite:///";

/// Open or create a database in WAL mode. Several loaders write the same org file, so every
/// connection waits on locks instead of failing at once.
pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open database {}", path.display()))?;
    conn.busy_timeout(SQLITE_BUSY_TIMEOUT)
        .context("set busy timeout")?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    Ok(conn)
}

/// `sqlite:///<absolute path>`.
pub fn sqlite_url(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let s = abs.display().to_string();
    format!("{SQLITE_URL_PREFIX}{}", s.trim_start_matches('/'))
}

pub fn sqlite_path_from_url(url: &str) -> Result<PathBuf> {
    let Some(rest) = url.strip_prefix(SQLITE_URL_PREFIX) else {
        bail!("Unsupported database_url `{url}` (expected sqlite:///<path>)");
    };
    if cfg!(windows) {
        Ok(PathBuf::from(rest))
    } else {
        Ok(PathBuf::from(format!("/{rest}")))
    }
}

pub fn open_db_url(url: &str) -> Result<Connection> {
    open_db(&sqlite_path_from_url(url)?)
}
