//! recsweep: resumable batch-processing engine for maintenance jobs against rate-limited record stores

pub mod checkpoint;
pub mod connector;
pub mod engine;
pub mod error;
pub mod input_file;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use checkpoint::{CheckpointError, CheckpointLog};
pub use connector::{
    AuthMode, ConnectionPool, Connector, PoolOptions, Proxy, RemoteFault, RemoteService, SqliteConnector,
};
pub use engine::{EngineOptions, JobRunner, StopReason};
pub use error::SetupError;
pub use jobs::{DataJob, ExecutionMode, JobRegistry};
pub use logging::{JobLogger, LogLevel, Properties, StdLogger};
pub use pipeline::ExecutionContext;

use log::debug;
use std::sync::Arc;

/// Result alias used by public recsweep API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Single entry point for library use: run `job` over `pool` with `options` and return its summary.
///
/// `summary.completed` is the run outcome (`false` when every record of a drain round failed or
/// the run was interrupted). Fatal setup errors are returned as `Err`.
///
/// ```ignore
/// let logger: Arc<dyn JobLogger> = Arc::new(StdLogger::new(LogLevel::Information));
/// let connector = Arc::new(SqliteConnector::new("crm.db", AuthMode::OAuth));
/// let pool = ConnectionPool::connect(connector, PoolOptions::default(), Arc::clone(&logger))?;
/// let summary = recsweep::run_job(&pool, &PurgePluginTraces, EngineOptions::default(), logger)?;
/// ```
pub fn run_job(
    pool: &ConnectionPool,
    job: &dyn DataJob,
    options: EngineOptions,
    logger: Arc<dyn JobLogger>,
) -> Result<RunSummary> {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        options
    );
    JobRunner::new(pool, options, logger).run(job)
}
