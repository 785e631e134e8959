//! snowqueue CLI: `run` a parallel data load; `worker` is spawned by the controller.

use anyhow::Result;
use clap::Parser;
use snowqueue::engine::arg_parser::Cli;
use snowqueue::engine::handle_cli;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_cli(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
