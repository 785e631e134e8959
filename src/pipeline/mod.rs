//! Pipeline components: portion sizing, run-until strategies, the two-queue manager and the
//! driver loop.

pub mod driver;
pub mod poller;
pub mod portions;
pub mod queue_manager;
pub mod run_until;
pub mod status;
pub mod subtask_config;

pub use driver::{DataLoad, DataLoadSummary, RunningTotals};
pub use poller::OrgCountPoller;
pub use portions::PortionGenerator;
pub use queue_manager::{QueueManager, QueueManagerConfig, data_loader_new_directory_name};
pub use run_until::{RunUntil, determine_run_until};
pub use status::UploadStatus;
pub use subtask_config::SubtaskConfigurator;
