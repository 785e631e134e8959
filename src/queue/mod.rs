//! Directory-backed work queues and the workers they run.

pub mod config;
pub mod job_dir;
pub mod job_log;
pub mod keychain;
pub mod parallel;
pub mod spawn;
pub mod work_queue;
pub mod worker;

pub use config::{SharedConfig, WORKER_CONFIG_SCHEMA_VERSION, WorkerConfig};
pub use job_log::JobLog;
pub use keychain::{CONNECTED_APP_SERVICE, WorkerKeychain};
pub use parallel::ParallelWorker;
pub use spawn::{
    ProcessSpawner, SpawnKind, Spawner, ThreadSpawner, WORKER_SUBCOMMAND, WorkerHandle,
};
pub use work_queue::{MakeTaskOptions, RenameDirectory, WorkerQueue, WorkerQueueConfig};
pub use worker::{TaskWorker, run_worker_from_stdin};
