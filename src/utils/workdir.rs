use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Working directory for one run: caller-provided, or a temp dir that is removed on drop unless
/// kept for debugging.
pub enum WorkingDir {
    Given(PathBuf),
    Temp(TempDir),
    Kept(PathBuf),
}

impl WorkingDir {
    pub fn path(&self) -> &Path {
        match self {
            WorkingDir::Given(p) | WorkingDir::Kept(p) => p,
            WorkingDir::Temp(t) => t.path(),
        }
    }
}

/// Create the working directory. A given path must not exist yet: queues create their
/// subdirectories with plain `create_dir` and a leftover tree from an older run would be
/// mistaken for queued work.
pub fn prepare_working_dir(given: Option<&Path>, keep: bool) -> Result<WorkingDir> {
    match given {
        Some(path) => {
            std::fs::create_dir(path)
                .with_context(|| format!("create working directory {}", path.display()))?;
            let path = path
                .canonicalize()
                .context("canonicalize working directory")?;
            log::info!("Working Directory {}", path.display());
            Ok(WorkingDir::Given(path))
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix(concat!(env!("CARGO_PKG_NAME"), "_"))
                .tempdir()
                .context("create temporary working directory")?;
            if keep {
                let path = temp.keep();
                log::info!(
                    "Due to debug mode, Working Directory {} will not be removed",
                    path.display()
                );
                Ok(WorkingDir::Kept(path))
            } else {
                Ok(WorkingDir::Temp(temp))
            }
        }
    }
}
