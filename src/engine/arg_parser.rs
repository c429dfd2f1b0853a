use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogLevel;

/// Resumable batch jobs against a record store.
#[derive(Clone, Parser)]
#[command(name = "recsweep", version)]
#[command(about = "Run resumable maintenance jobs against a record store.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file. Default: `recsweep.toml` in the current directory.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Run jobs (from --job or the `[jobs] names` setting), one after another.
    Run(RunArgs),
    /// List registered jobs.
    List,
    /// Load records from a JSON-lines file into the local store.
    Import(ImportArgs),
}

#[derive(Clone, Args)]
pub struct CommonArgs {
    /// Record store file. Default: `recsweep.db` in the current directory.
    #[arg(long, short = 'e')]
    pub endpoint: Option<PathBuf>,
}

#[derive(Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Jobs to run, by registered name or type name. Can specify multiple: -j a b
    #[arg(long, short = 'j', num_args = 1..)]
    pub job: Vec<String>,

    /// Worker threads per round.
    #[arg(long, short = 't')]
    pub threads: Option<usize>,

    /// Records per page (scan) or per round (drain).
    #[arg(long, short = 'p')]
    pub page_size: Option<usize>,

    /// Wall-clock budget for drain jobs, in hours.
    #[arg(long)]
    pub max_hours: Option<f64>,

    /// verbose | information | errors_and_success | errors_only (or 0-3).
    #[arg(long, short = 'l')]
    pub log_level: Option<LogLevel>,

    /// Directory for progress (checkpoint) files.
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Login principal for the record store.
    #[arg(long)]
    pub principal: Option<String>,

    /// Caller id stamped on every connection.
    #[arg(long)]
    pub caller_id: Option<String>,

    /// Show a progress bar per round.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,

    /// Input file for input-file jobs (header line, then one record per line).
    #[arg(long, short = 'i')]
    pub input_file: Option<PathBuf>,
}

#[derive(Clone, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// JSON-lines file, one record per line.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}
