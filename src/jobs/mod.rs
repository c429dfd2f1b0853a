//! Job definitions: the [`DataJob`] trait, the name → factory registry, and built-in jobs.

pub mod builtin;
pub mod registry;

pub use registry::{JobFactory, JobRegistry};

use std::path::PathBuf;

use crate::connector::Proxy;
use crate::input_file::DEFAULT_SEPARATORS;
use crate::pipeline::ExecutionContext;
use crate::types::{Criterion, Record};

/// How the engine walks a job's selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Retrieve the whole selection once (paged), process it, checkpoint every success.
    BoundedScan,
    /// Retrieve one page at a time and requery until the selection is empty.
    /// Processing must remove records from the selection.
    IterativeDrain,
    /// Walk the lines of an input file: look each record up, then process it. Outcomes are
    /// tracked per line in a pivot file.
    InputFile,
}

/// A maintenance job: what to select and what to do with each record.
/// `process` may run on many threads at once and must be idempotent per record.
pub trait DataJob: Send + Sync {
    /// Display name used in logs.
    fn name(&self) -> &str;

    /// Stable identifier; also names the checkpoint file.
    fn type_name(&self) -> &str;

    fn mode(&self) -> ExecutionMode;

    fn selection_criterion(&self, caller_id: &str) -> Criterion;

    fn process(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()>;

    /// Force a worker count for this job (e.g. 1 for order-sensitive work).
    fn thread_override(&self) -> Option<usize> {
        None
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn pre_operation(&self, _main: &mut Proxy) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_operation(&self, _main: &mut Proxy) -> anyhow::Result<()> {
        Ok(())
    }

    /// Input file for [`ExecutionMode::InputFile`]. Engine options may override it.
    fn input_file(&self) -> Option<PathBuf> {
        None
    }

    fn input_separators(&self) -> &[char] {
        DEFAULT_SEPARATORS
    }

    /// Find the record an input line refers to.
    fn search_record(&self, _proxy: &mut Proxy, _fields: &[String]) -> anyhow::Result<Record> {
        anyhow::bail!("{} does not look up input lines", self.type_name())
    }

    /// Process the record found for an input line. Defaults to [`process`](Self::process).
    fn process_line(&self, ctx: &mut ExecutionContext<'_>, _fields: &[String]) -> anyhow::Result<()> {
        self.process(ctx)
    }
}
