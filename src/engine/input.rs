//! Input-file mode: read the job's input file, skip lines the pivot file already marks `OK`,
//! process the rest in one round, and leave the pivot file behind as the outcome report.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Instant;

use super::runner::{JobRunner, format_elapsed};
use super::stop::StopReason;
use crate::error::SetupError;
use crate::input_file::{PivotLog, pivot_path, read_input_file};
use crate::jobs::DataJob;
use crate::pipeline::RunContext;
use crate::types::RunSummary;

pub(crate) fn run_input_file(
    runner: &JobRunner<'_>,
    job: &dyn DataJob,
    run: &RunContext,
) -> Result<RunSummary> {
    let options = runner.options();
    let logger = runner.logger();
    let name = job.name();
    let started = Instant::now();

    let input_path = options
        .input_file
        .clone()
        .or_else(|| job.input_file())
        .ok_or(SetupError::MissingSetting("process.input_file"))?;
    let separators = job.input_separators();
    let separator = separators.first().copied().unwrap_or(',');
    let input = read_input_file(&input_path, separators)?;
    logger.log_message(
        &format!("Retrieved {} lines from file {}", input.lines.len(), input_path.display()),
        Some(name),
    );

    let pivot = PivotLog::new(
        pivot_path(&options.checkpoint_dir, job.type_name())?,
        separator,
        options.checkpoint_lock_timeout,
    );
    let done: HashSet<String> = if pivot.exists() {
        let done = pivot.completed_lines().context("read pivot file")?;
        logger.log_message(
            &format!(
                "Pivot file {} detected! Resuming ({} lines already processed)",
                pivot.path().display(),
                done.len()
            ),
            Some(name),
        );
        done
    } else {
        pivot.create(&input.header).context("create pivot file")?;
        logger.log_message(
            &format!("Pivot file {} created", pivot.path().display()),
            Some(name),
        );
        HashSet::new()
    };

    let stats = runner.line_round(job, run, &input.lines, &pivot, &done)?;

    let mut summary = RunSummary {
        rounds: 1,
        retrieved: input.lines.len(),
        ..RunSummary::default()
    };
    summary.absorb(&stats);

    let elapsed = started.elapsed();
    let summary = summary.finish(StopReason::ScanCompleted, elapsed);
    logger.log_message(
        &format!(
            "{} lines processed in {} [Speed = {} rec/sec]",
            input.lines.len(),
            format_elapsed(elapsed),
            summary.speed()
        ),
        Some(name),
    );
    Ok(summary)
}
