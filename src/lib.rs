//! snowqueue: parallel data generation and load through directory-backed work queues.

pub mod engine;
pub mod errors;
pub mod org;
pub mod pipeline;
pub mod queue;
pub mod tasks;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use errors::PipelineError;
pub use pipeline::{DataLoad, DataLoadSummary, PortionGenerator, RunUntil, UploadStatus};
pub use queue::{WorkerQueue, WorkerQueueConfig};
pub use types::*;

use log::debug;

/// Result alias used by public snowqueue API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point: validate `opts`, run the data load to completion and return its summary.
///
/// Process workers re-run the current executable with the hidden `worker` subcommand, so
/// library callers that are not the `snowqueue` binary should use [`SpawnKind::Thread`](crate::queue::SpawnKind)
/// for both stages:
///
/// ```ignore
/// let opts = LoadOpts {
///     recipe: "accounts.recipe.toml".into(),
///     org: OrgConnection::sqlite("dev", Path::new("org.db")),
///     generator_spawn: SpawnKind::Thread,
///     ..Default::default()
/// };
/// let summary = snowqueue::load_data(opts)?;
/// ```
pub fn load_data(opts: LoadOpts) -> Result<DataLoadSummary> {
    let config_str = format!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );
    debug!("{}", config_str);
    DataLoad::new(opts)?.run()
}
