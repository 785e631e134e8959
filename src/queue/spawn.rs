//! How a worker is started: on a thread of this process, or as a child process running the
//! hidden `worker` subcommand with its config on stdin.

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::errors::PipelineError;
use crate::queue::config::WorkerConfig;
use crate::queue::worker::TaskWorker;
use crate::tasks::TaskRegistry;

/// Subcommand a process worker is started with.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// A running worker as seen from the controller.
pub trait WorkerHandle: Send {
    fn is_alive(&mut self) -> bool;
    /// Wait for the worker. `Err` when the job failed or the worker died.
    fn join(&mut self) -> Result<()>;
    /// Stop the worker. Threads cannot be stopped and return an error.
    fn terminate(&mut self) -> Result<()>;
}

pub trait Spawner: Send + Sync {
    fn spawn(&self, config: WorkerConfig) -> Result<Box<dyn WorkerHandle>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnKind {
    #[default]
    Thread,
    Process,
}

impl SpawnKind {
    /// Process workers re-run the current executable.
    pub fn spawner(self, registry: Arc<TaskRegistry>) -> Result<Arc<dyn Spawner>> {
        Ok(match self {
            SpawnKind::Thread => Arc::new(ThreadSpawner::new(registry)),
            SpawnKind::Process => Arc::new(ProcessSpawner::current_exe()?),
        })
    }
}

impl FromStr for SpawnKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(SpawnKind::Thread),
            "process" => Ok(SpawnKind::Process),
            other => Err(PipelineError::options(format!(
                "spawn must be either thread or process, got {other}"
            ))),
        }
    }
}

impl fmt::Display for SpawnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnKind::Thread => write!(f, "thread"),
            SpawnKind::Process => write!(f, "process"),
        }
    }
}

// ---- Threads ----

pub struct ThreadSpawner {
    registry: Arc<TaskRegistry>,
}

impl ThreadSpawner {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }
}

impl Spawner for ThreadSpawner {
    fn spawn(&self, config: WorkerConfig) -> Result<Box<dyn WorkerHandle>> {
        let registry = Arc::clone(&self.registry);
        let name = format!("worker-{}", config.job_name());
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let job = config.job_name();
                let result = TaskWorker::new(config, registry).run();
                if let Err(e) = &result {
                    debug!("Job {job} failed: {e:#}");
                }
                result
            })
            .context("spawn worker thread")?;
        Ok(Box::new(ThreadHandle {
            handle: Some(handle),
        }))
    }
}

struct ThreadHandle {
    handle: Option<JoinHandle<Result<()>>>,
}

impl WorkerHandle for ThreadHandle {
    fn is_alive(&mut self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))?
    }

    fn terminate(&mut self) -> Result<()> {
        bail!("worker threads cannot be terminated")
    }
}

// ---- Processes ----

pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    /// `program args...` must read a [`WorkerConfig`] from stdin and run it.
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// `<this executable> worker`.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("locate current executable")?;
        Ok(Self::new(program, vec![WORKER_SUBCOMMAND.to_string()]))
    }
}

impl Spawner for ProcessSpawner {
    fn spawn(&self, config: WorkerConfig) -> Result<Box<dyn WorkerHandle>> {
        let json = config.to_json()?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn worker process {}", self.program.display()))?;
        let mut stdin = child.stdin.take().context("worker stdin not captured")?;
        if let Err(e) = stdin.write_all(json.as_bytes()) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("send config to worker process");
        }
        // Closing stdin marks the end of the config.
        drop(stdin);
        debug!("Worker process {} started for {}", child.id(), config.job_name());
        Ok(Box::new(ProcessHandle {
            child,
            status: None,
        }))
    }
}

struct ProcessHandle {
    child: Child,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    fn check(status: ExitStatus) -> Result<()> {
        if status.success() {
            Ok(())
        } else {
            bail!("worker process exited with {status}")
        }
    }
}

impl WorkerHandle for ProcessHandle {
    fn is_alive(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                debug!("try_wait on worker {}: {}", self.child.id(), e);
                false
            }
        }
    }

    fn join(&mut self) -> Result<()> {
        if let Some(status) = self.status {
            return Self::check(status);
        }
        let status = self.child.wait().context("wait for worker process")?;
        self.status = Some(status);
        Self::check(status)
    }

    fn terminate(&mut self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        self.child.kill().context("kill worker process")?;
        self.status = self.child.wait().ok();
        Ok(())
    }
}
