//! What lives inside one job directory, and how to read it from the controller.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::engine::db_ops::{SF_IDS_SUFFIX, count_rows, drop_tables, list_tables, open_db, sqlite_url};
use crate::queue::job_dir::index_from_name;
use crate::utils::config::JobFiles;

pub struct JobWorkingDirectory {
    dir: PathBuf,
}

impl JobWorkingDirectory {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable part of the directory name (`3` for `3_2000`).
    pub fn index(&self) -> String {
        let name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        index_from_name(&name).to_string()
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.join(JobFiles::DATABASE_FILE)
    }

    pub fn database_url(&self) -> String {
        sqlite_url(&self.database_path())
    }

    pub fn mapping_file(&self) -> PathBuf {
        self.dir.join(JobFiles::MAPPING_FILE)
    }

    pub fn continuation_file(&self) -> PathBuf {
        self.dir.join(JobFiles::CONTINUATION_FILE)
    }

    fn data_tables(&self) -> Result<Vec<String>> {
        let path = self.database_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let conn = open_db(&path)?;
        Ok(list_tables(&conn)?
            .into_iter()
            .filter(|t| !t.ends_with(SF_IDS_SUFFIX))
            .collect())
    }

    /// Rows per object in the job database (id-mapping tables excluded).
    pub fn record_counts(&self) -> Result<BTreeMap<String, u64>> {
        let tables = self.data_tables()?;
        if tables.is_empty() {
            return Ok(BTreeMap::new());
        }
        let conn = open_db(&self.database_path())?;
        let mut counts = BTreeMap::new();
        for table in tables {
            let n = count_rows(&conn, &table)?;
            counts.insert(table, n);
        }
        Ok(counts)
    }

    /// Objects the recipe generates, as seen in the database.
    pub fn relevant_sobjects(&self) -> Result<Vec<String>> {
        self.data_tables()
    }

    /// Drop every data table, keeping only local-id to org-id mappings. Later jobs copy this
    /// directory and only need the mappings.
    pub fn cleanup_data_tables(&self) -> Result<()> {
        let tables = self.data_tables()?;
        if tables.is_empty() {
            return Ok(());
        }
        let conn = open_db(&self.database_path())?;
        drop_tables(&conn, &tables).context("drop data tables")?;
        conn.execute_batch("VACUUM").context("compact template database")?;
        Ok(())
    }
}
