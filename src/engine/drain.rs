//! Iterative drain: retrieve one page, process it, requery until a stop rule fires.

use anyhow::Result;
use std::time::Instant;

use super::retrieve::retrieve_page;
use super::runner::{JobRunner, format_elapsed};
use super::stop::{self, RoundObservation, StopReason};
use crate::jobs::DataJob;
use crate::pipeline::RunContext;
use crate::types::{RunSummary, records_per_second};

pub(crate) fn run_iterative_drain(
    runner: &JobRunner<'_>,
    job: &dyn DataJob,
    run: &RunContext,
) -> Result<RunSummary> {
    let options = runner.options();
    let logger = runner.logger();
    let name = job.name();
    let page_size = options.page_size.max(1);
    let started = Instant::now();

    let mut criterion = job.selection_criterion(&run.caller_id);
    criterion.top_count = Some(page_size);
    criterion.page = None;
    criterion.no_lock = true;

    let mut summary = RunSummary::default();
    let mut last_count = page_size;

    let reason = loop {
        let page = retrieve_page(runner.pool(), logger, &options.retrieval_retry, &criterion, name)?;
        let count = page.records.len();
        summary.rounds += 1;
        summary.retrieved += count;

        if stop::is_drained(count) {
            break StopReason::Drained;
        }
        logger.log_message(&format!("Retrieved {count} records"), Some(name));

        let stats = runner.round(job, run, &page.records, summary.rounds, None, None)?;
        summary.absorb(&stats);

        let elapsed = started.elapsed();
        logger.log_message(
            &format!(
                "{count} records processed in {} [Speed = {} rec/sec]",
                format_elapsed(stats.elapsed),
                stats.speed()
            ),
            Some(name),
        );
        logger.log_message(
            &format!(
                "Total = {} records processed in {} [Speed = {} rec/sec]",
                summary.attempted,
                format_elapsed(elapsed),
                records_per_second(summary.attempted, elapsed)
            ),
            Some(name),
        );

        let observation = RoundObservation {
            last_count,
            count,
            page_size,
            elapsed,
            max_duration: options.max_run_duration,
            attempted: stats.attempted,
            failed: stats.failed,
            interrupted: runner.interrupted(),
        };
        if let Some(reason) = stop::decide_after_round(&observation) {
            break reason;
        }
        last_count = count;
    };

    let verb = if reason.completed() { "completed" } else { "stopped" };
    logger.log_message(&format!("Operation {verb}! (Reason: {reason})"), Some(name));
    Ok(summary.finish(reason, started.elapsed()))
}
