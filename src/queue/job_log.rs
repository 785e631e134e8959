//! Per-job log file. Each line carries seconds since the job started.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

pub struct JobLog {
    name: String,
    start: Instant,
    file: Option<(PathBuf, Mutex<File>)>,
}

impl JobLog {
    /// Log to `<dir>/<class_name>.log` (and the debug log).
    pub fn create(dir: &Path, class_name: &str) -> Result<Self> {
        let path = dir.join(format!("{class_name}.log"));
        let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self {
            name: class_name.to_string(),
            start: Instant::now(),
            file: Some((path, Mutex::new(file))),
        })
    }

    /// Log only to the process logger.
    pub fn console(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(p, _)| p.as_path())
    }

    pub fn info(&self, msg: impl Display) {
        debug!("[{}] {}", self.name, msg);
        self.write_line("INFO", &msg);
    }

    pub fn warn(&self, msg: impl Display) {
        warn!("[{}] {}", self.name, msg);
        self.write_line("WARN", &msg);
    }

    // Unbuffered: a killed worker still leaves everything logged so far.
    fn write_line(&self, level: &str, msg: &dyn Display) {
        let Some((_, file)) = &self.file else {
            return;
        };
        let elapsed = self.start.elapsed().as_secs_f64();
        if let Ok(mut f) = file.lock() {
            let _ = writeln!(f, "{elapsed:>9.3}s {level:<5} {msg}");
        }
    }
}
