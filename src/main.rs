//! recsweep CLI: run maintenance jobs; exit code 2 when a job stops without completing.

use anyhow::Result;
use clap::Parser;
use recsweep::engine::arg_parser::Cli;
use recsweep::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    let completed = handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    if !completed {
        std::process::exit(2);
    }
    Ok(())
}
