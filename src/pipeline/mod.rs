//! Pipeline components: run/record context, the parallel round, round error handling.

pub mod context;
pub mod error_handler;
pub mod workers;

pub use context::{ExecutionContext, Outcome, RunContext, process_properties};
pub use error_handler::check_round_completion;
pub use workers::{RoundParams, RoundStats, run_line_round, run_round};
