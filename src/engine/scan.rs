//! Bounded scan: load checkpoint, retrieve the whole selection, process it once, clean up.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Instant;

use super::retrieve::retrieve_all;
use super::runner::{JobRunner, format_elapsed};
use super::stop::StopReason;
use crate::checkpoint::{CheckpointLog, checkpoint_path};
use crate::jobs::DataJob;
use crate::pipeline::RunContext;
use crate::types::RunSummary;

pub(crate) fn run_bounded_scan(
    runner: &JobRunner<'_>,
    job: &dyn DataJob,
    run: &RunContext,
) -> Result<RunSummary> {
    let options = runner.options();
    let logger = runner.logger();
    let name = job.name();
    let started = Instant::now();

    let path = checkpoint_path(&options.checkpoint_dir, job.type_name())?;
    let log = CheckpointLog::new(path, options.checkpoint_lock_timeout);
    logger.log_message(&format!("Checking {} existence...", log.path().display()), Some(name));
    let processed: HashSet<String> = if log.exists() {
        let ids: HashSet<String> = log.read_all()?.into_iter().collect();
        logger.log_message(
            &format!(
                "Progress file detected! Resuming from its last state ({} records already processed)",
                ids.len()
            ),
            Some(name),
        );
        ids
    } else {
        logger.log_message("Progress file not detected! Starting from 0", Some(name));
        log.create()?;
        HashSet::new()
    };

    let mut criterion = job.selection_criterion(&run.caller_id);
    criterion.no_lock = true;
    let records = retrieve_all(
        runner.pool(),
        logger,
        &options.retrieval_retry,
        &mut criterion,
        options.page_size,
        name,
    )?;
    logger.log_message(&format!("Retrieved {} records", records.len()), Some(name));

    let stats = runner.round(job, run, &records, 1, Some(&log), Some(&processed))?;

    let mut summary = RunSummary {
        rounds: 1,
        retrieved: records.len(),
        ..RunSummary::default()
    };
    summary.absorb(&stats);

    if stats.all_attempted() {
        log.delete().context("remove progress file")?;
        logger.log_message("Progress file removed", Some(name));
    }

    let elapsed = started.elapsed();
    let summary = summary.finish(StopReason::ScanCompleted, elapsed);
    logger.log_message(
        &format!(
            "{} records processed in {} [Speed = {} rec/sec]",
            records.len(),
            format_elapsed(elapsed),
            summary.speed()
        ),
        Some(name),
    );
    Ok(summary)
}
