//! Engine: command line, CLI handlers, SQLite helpers and progress display.

pub mod arg_parser;
pub mod cli;
pub mod db_ops;
pub mod progress;

// Re-export commonly used functions
pub use arg_parser::{Cli, Commands, RunArgs, parse_pairs};
pub use cli::{handle_cli, handle_run, handle_worker};
pub use db_ops::{open_db, open_db_url, sqlite_url};
