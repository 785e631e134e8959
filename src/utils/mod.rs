pub mod app_toml;
pub mod config;
pub mod credentials;
pub mod fd_limit;
pub mod logger;
pub mod workdir;

pub use app_toml::{apply_file_to_opts, load_snowqueue_toml};
pub use config::*;
pub use credentials::load_connected_app;
pub use fd_limit::{FDS_PER_WORKER, cap_worker_counts, max_open_fds, max_workers_by_fd_limit};
pub use logger::setup_logging;
pub use workdir::{WorkingDir, prepare_working_dir};
