//! Job execution engine: runner, the execution modes, stop rules, retrieval, CLI

pub mod arg_parser;
pub mod cli;
pub mod drain;
pub mod input;
pub mod progress;
pub mod retrieve;
pub mod runner;
pub mod scan;
pub mod stop;

// Re-export commonly used items
pub use arg_parser::{Cli, Commands, CommonArgs, ImportArgs, RunArgs};
pub use cli::handle_run;
pub use retrieve::{retrieve_all, retrieve_page};
pub use runner::{EngineOptions, JobRunner};
pub use stop::{RoundObservation, StopReason, decide_after_round};
