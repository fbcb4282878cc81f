//! Mediadex CLI: scan, sync, watch, and inspect media libraries.

use anyhow::Result;
use clap::Parser;
use mediadex::cli::{Cli, handle_run};
use mediadex::utils::setup_logging;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
