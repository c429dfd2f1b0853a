//! Fatal setup errors. Any of these aborts the run and surfaces as a non-zero exit.

use thiserror::Error;

use crate::connector::RemoteFault;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("could not establish the main connection after {attempts} attempts: {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: RemoteFault,
    },

    #[error("{unattempted} of {total} records were never attempted (no worker could connect: {reason})")]
    WorkersUnavailable {
        unattempted: usize,
        total: usize,
        reason: String,
    },

    #[error("invalid job type name {0:?} for a checkpoint file (must be non-empty, without path separators)")]
    InvalidCheckpointName(String),

    #[error("unknown job {0:?} (see `recsweep list`)")]
    UnknownJob(String),

    #[error("job {0:?} is registered twice")]
    DuplicateJob(String),

    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),
}
