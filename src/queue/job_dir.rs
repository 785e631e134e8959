//! Job directories: the unit of work moved between queues.
//!
//! A job directory's name is `<index>_<count>`: a stable key plus the number of record sets it
//! carries. Counts are derived from names, so anything that changes the real count of a job must
//! rename its directory.

use anyhow::{Context, Result, bail};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// `"<index>_<count>"`.
pub fn job_dir_name(index: impl std::fmt::Display, count: u64) -> String {
    format!("{index}_{count}")
}

/// Record-set count encoded after the last `_`, if any.
pub fn count_from_name(name: &str) -> Option<u64> {
    let (_, count) = name.rsplit_once('_')?;
    count.parse().ok()
}

/// Index encoded before the last `_` (or the whole name when there is no count).
pub fn index_from_name(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((index, count)) if count.parse::<u64>().is_ok() => index,
        _ => name,
    }
}

/// Sum of the counts of `names`. Names without a count contribute nothing.
pub fn set_count_from_names<S: AsRef<str>>(names: &[S]) -> u64 {
    names
        .iter()
        .filter_map(|n| count_from_name(n.as_ref()))
        .sum()
}

/// Sibling path of `dir` with its count replaced by `count`.
pub fn with_count(dir: &Path, count: u64) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let renamed = job_dir_name(index_from_name(&name), count);
    dir.with_file_name(renamed)
}

/// Ordering key: numeric index first (so `10_x` follows `9_x`), then name.
fn job_sort_key(path: &Path) -> (u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let numeric = index_from_name(&name).parse::<u64>().unwrap_or(u64::MAX);
    (numeric, name)
}

/// Immediate children of `dir` that are directories, in job order. Hidden entries (such as a
/// `.<name>.partial` copy in flight) are skipped. A missing dir is empty.
pub fn list_job_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("list {}", dir.display())),
    };
    let mut dirs = Vec::new();
    for entry in rd {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort_by_key(|p| job_sort_key(p));
    Ok(dirs)
}

pub fn dir_names(dirs: &[PathBuf]) -> Vec<String> {
    dirs.iter()
        .filter_map(|d| d.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

/// Move `src` into `dest_dir` (created if needed), keeping its name. Returns the new path.
///
/// `fs::rename` keeps the move atomic on one filesystem. Across devices the tree is copied to a
/// hidden sibling and renamed into place, so the destination never shows a half-copied job.
/// Refuses to clobber an existing job of the same name.
pub fn move_into(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .with_context(|| format!("job directory has no name: {}", src.display()))?;
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("create {}", dest_dir.display()))?;
    let dest = dest_dir.join(name);
    if dest.exists() {
        bail!(
            "cannot move {} -> {}: destination already exists",
            src.display(),
            dest.display()
        );
    }
    match fs::rename(src, &dest) {
        Ok(()) => Ok(dest),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let partial = dest_dir.join(format!(".{}.partial", name.to_string_lossy()));
            copy_tree(src, &partial)?;
            fs::rename(&partial, &dest).with_context(|| {
                format!("rename {} -> {}", partial.display(), dest.display())
            })?;
            fs::remove_dir_all(src).with_context(|| format!("remove {}", src.display()))?;
            Ok(dest)
        }
        Err(e) => Err(e)
            .with_context(|| format!("move {} -> {}", src.display(), dest.display())),
    }
}

/// Recursively copy the directory `src` to `dest` (which must not exist).
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} outside {}", entry.path().display(), src.display()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} -> {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}
