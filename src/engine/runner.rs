//! Job runner: owns the run lifecycle (pre-operation, mode dispatch, post-operation) and the
//! shared round plumbing used by every mode.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::progress::{ProgressBar, finish_progress_bar, round_progress_bar};
use super::{drain, input, scan};
use crate::checkpoint::CheckpointLog;
use crate::input_file::{InputLine, PivotLog};
use crate::connector::{BackoffPolicy, ConnectionPool, RetryPolicy, RetryStrategy};
use crate::jobs::{DataJob, ExecutionMode};
use crate::logging::JobLogger;
use crate::pipeline::{
    RoundParams, RoundStats, RunContext, check_round_completion, run_line_round, run_round,
};
use crate::types::{Record, RunSummary};
use crate::utils::config::{Defaults, new_run_id};

/// Engine knobs for one run.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub run_id: String,
    pub threads: usize,
    pub page_size: usize,
    pub max_run_duration: Duration,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_lock_timeout: Duration,
    /// Sleep before retrying a record after a transient fault.
    pub record_backoff: BackoffPolicy,
    pub transient_retry_limit: u32,
    pub retrieval_retry: RetryPolicy,
    pub show_progress: bool,
    /// Input file for input-file jobs, in place of the job's own.
    pub input_file: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            run_id: new_run_id(),
            threads: Defaults::THREADS,
            page_size: Defaults::PAGE_SIZE,
            max_run_duration: Duration::from_secs_f64(Defaults::MAX_RUN_HOURS * 3600.0),
            checkpoint_dir: PathBuf::from(Defaults::CHECKPOINT_DIR),
            checkpoint_lock_timeout: Duration::from_millis(Defaults::CHECKPOINT_LOCK_TIMEOUT_MS),
            record_backoff: BackoffPolicy::default(),
            transient_retry_limit: Defaults::TRANSIENT_RETRY_LIMIT,
            retrieval_retry: RetryPolicy::new(
                Defaults::RETRIEVAL_ATTEMPTS,
                Duration::from_secs(Defaults::RETRIEVAL_WAIT_SECS),
                RetryStrategy::Exponential,
            ),
            show_progress: false,
            input_file: None,
        }
    }
}

impl EngineOptions {
    /// No sleeping between retries (record backoff and retrieval retry).
    pub fn without_delays(mut self) -> Self {
        self.record_backoff = BackoffPolicy::none();
        self.retrieval_retry.wait = Duration::ZERO;
        self
    }
}

/// Runs jobs against one connection pool.
pub struct JobRunner<'a> {
    pool: &'a ConnectionPool,
    options: EngineOptions,
    logger: Arc<dyn JobLogger>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> JobRunner<'a> {
    pub fn new(pool: &'a ConnectionPool, options: EngineOptions, logger: Arc<dyn JobLogger>) -> Self {
        Self {
            pool,
            options,
            logger,
            interrupt: None,
        }
    }

    /// Flag checked between drain rounds; when set the run stops with outcome `false`.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        self.pool
    }

    pub(crate) fn logger(&self) -> &dyn JobLogger {
        self.logger.as_ref()
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn run_context(&self, job: &dyn DataJob) -> RunContext {
        RunContext::new(
            self.options.run_id.clone(),
            job.name(),
            job.type_name(),
            self.worker_count(job),
            self.options.page_size,
            self.options.max_run_duration,
            self.pool.caller_id(),
        )
    }

    /// Job override or configured threads, capped by the pool's limit.
    pub fn worker_count(&self, job: &dyn DataJob) -> usize {
        job.thread_override()
            .unwrap_or(self.options.threads)
            .min(self.pool.max_workers())
            .max(1)
    }

    /// Run one job to its outcome. Fatal errors are logged as failures and returned.
    pub fn run(&self, job: &dyn DataJob) -> Result<RunSummary> {
        let run = self.run_context(job);
        let name = job.name();
        self.logger.log_message("Job start", Some(name));
        let result = self.run_inner(job, &run);
        match &result {
            Ok(summary) => {
                self.logger.log_message(
                    &format!(
                        "Job stop (completed = {}, succeeded = {}, failed = {}, skipped = {})",
                        summary.completed, summary.succeeded, summary.failed, summary.skipped
                    ),
                    Some(name),
                );
            }
            Err(err) => self.logger.log_failure(err, None, &run.properties(), name),
        }
        result
    }

    fn run_inner(&self, job: &dyn DataJob, run: &RunContext) -> Result<RunSummary> {
        job.pre_operation(&mut self.pool.main_proxy())
            .context("pre-operation")?;
        let summary = match job.mode() {
            ExecutionMode::BoundedScan => scan::run_bounded_scan(self, job, run)?,
            ExecutionMode::IterativeDrain => drain::run_iterative_drain(self, job, run)?,
            ExecutionMode::InputFile => input::run_input_file(self, job, run)?,
        };
        job.post_operation(&mut self.pool.main_proxy())
            .context("post-operation")?;
        Ok(summary)
    }

    /// One parallel round over `records`. Fails only when records were left unattempted.
    pub(crate) fn round(
        &self,
        job: &dyn DataJob,
        run: &RunContext,
        records: &[Record],
        round: usize,
        checkpoint: Option<&CheckpointLog>,
        processed: Option<&HashSet<String>>,
    ) -> Result<RoundStats> {
        let bar = round_progress_bar(self.options.show_progress, records.len(), round);
        let params = self.round_params(job, run, checkpoint, processed, bar.as_ref());
        let stats = run_round(records, &params);
        if let Some(bar) = &bar {
            finish_progress_bar(bar);
        }
        check_round_completion(&stats)?;
        Ok(stats)
    }

    /// One parallel round over input lines, outcomes appended to `pivot`.
    pub(crate) fn line_round(
        &self,
        job: &dyn DataJob,
        run: &RunContext,
        lines: &[InputLine],
        pivot: &PivotLog,
        done: &HashSet<String>,
    ) -> Result<RoundStats> {
        let bar = round_progress_bar(self.options.show_progress, lines.len(), 1);
        let params = self.round_params(job, run, None, None, bar.as_ref());
        let stats = run_line_round(lines, pivot, done, &params);
        if let Some(bar) = &bar {
            finish_progress_bar(bar);
        }
        check_round_completion(&stats)?;
        Ok(stats)
    }

    fn round_params<'r>(
        &'r self,
        job: &'r dyn DataJob,
        run: &'r RunContext,
        checkpoint: Option<&'r CheckpointLog>,
        processed: Option<&'r HashSet<String>>,
        progress: Option<&'r ProgressBar>,
    ) -> RoundParams<'r> {
        RoundParams {
            job,
            pool: self.pool,
            run,
            logger: self.logger.as_ref(),
            checkpoint,
            processed,
            workers: run.threads,
            backoff: self.options.record_backoff,
            transient_retry_limit: self.options.transient_retry_limit,
            progress,
        }
    }
}

impl RunSummary {
    pub(crate) fn absorb(&mut self, stats: &RoundStats) {
        self.attempted += stats.attempted;
        self.succeeded += stats.succeeded;
        self.failed += stats.failed;
        self.skipped += stats.skipped;
        self.transient_retries += stats.transient_retries;
    }
}

/// `HH:MM:SS.mmm` for elapsed-time log lines.
pub(crate) fn format_elapsed(d: Duration) -> String {
    let ms = d.as_millis();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        ms % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(3_723_004)), "01:02:03.004");
        assert_eq!(format_elapsed(Duration::ZERO), "00:00:00.000");
    }

    #[test]
    fn test_default_options() {
        let o = EngineOptions::default();
        assert_eq!(o.threads, 10);
        assert_eq!(o.page_size, 2500);
        assert_eq!(o.transient_retry_limit, 5);
        assert_eq!(o.checkpoint_lock_timeout, Duration::from_millis(5000));
        assert_eq!(o.record_backoff, BackoffPolicy::default());
        let fast = o.without_delays();
        assert!(fast.record_backoff.delay().is_zero());
    }
}
