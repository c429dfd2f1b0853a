//! One parallel round: records are queued on a channel up front, then a bounded set of scoped
//! workers drains it, each with its own proxy.

use crossbeam_channel::{Receiver, bounded};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::context::{ExecutionContext, Outcome, RunContext};
use crate::checkpoint::CheckpointLog;
use crate::connector::{BackoffPolicy, ConnectionPool, Proxy, RemoteFault, as_remote_fault};
use crate::engine::progress::{ProgressBar, update_progress_bar};
use crate::input_file::{InputLine, LineOutcome, PivotLog};
use crate::jobs::DataJob;
use crate::logging::{JobLogger, Properties};
use crate::types::{Record, records_per_second};
use crate::utils::config::ProgressConsts;

/// Shared inputs of a round.
pub struct RoundParams<'a> {
    pub job: &'a dyn DataJob,
    pub pool: &'a ConnectionPool,
    pub run: &'a RunContext,
    pub logger: &'a dyn JobLogger,
    /// Successful records are appended here (scan mode).
    pub checkpoint: Option<&'a CheckpointLog>,
    /// Ids already processed by an earlier run; skipped without side effects.
    pub processed: Option<&'a HashSet<String>>,
    pub workers: usize,
    pub backoff: BackoffPolicy,
    pub transient_retry_limit: u32,
    pub progress: Option<&'a ProgressBar>,
}

#[derive(Clone, Debug, Default)]
pub struct RoundStats {
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub transient_retries: usize,
    pub elapsed: Duration,
    /// First worker connection failure, if any.
    pub connection_error: Option<String>,
}

impl RoundStats {
    /// Records no worker ever picked up.
    pub fn unattempted(&self) -> usize {
        self.total.saturating_sub(self.attempted + self.skipped)
    }

    /// Every record was attempted or skipped.
    pub fn all_attempted(&self) -> bool {
        self.unattempted() == 0
    }

    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed == self.attempted
    }

    pub fn speed(&self) -> f64 {
        records_per_second(self.attempted + self.skipped, self.elapsed)
    }
}

#[derive(Default)]
struct RoundCounters {
    seen: AtomicUsize,
    attempted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    transient_retries: AtomicUsize,
}

impl RoundCounters {
    fn bump(counter: &AtomicUsize) -> usize {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn into_stats(self, total: usize, elapsed: Duration, connection_error: Option<String>) -> RoundStats {
        RoundStats {
            total,
            attempted: self.attempted.into_inner(),
            succeeded: self.succeeded.into_inner(),
            failed: self.failed.into_inner(),
            skipped: self.skipped.into_inner(),
            transient_retries: self.transient_retries.into_inner(),
            elapsed,
            connection_error,
        }
    }
}

/// Process `records` with up to `params.workers` threads. Per-record errors never stop the round.
pub fn run_round(records: &[Record], params: &RoundParams<'_>) -> RoundStats {
    let started = Instant::now();
    let counters = RoundCounters::default();
    let connection_error = fan_out(records, params, |proxy, record| {
        process_record(proxy, record, records.len(), params, &counters);
    });
    counters.into_stats(records.len(), started.elapsed(), connection_error)
}

/// Process input `lines`: look up each line's record, process it, and append the outcome to
/// `pivot`. Lines in `done` are skipped.
pub fn run_line_round(
    lines: &[InputLine],
    pivot: &PivotLog,
    done: &HashSet<String>,
    params: &RoundParams<'_>,
) -> RoundStats {
    let started = Instant::now();
    let counters = RoundCounters::default();
    let connection_error = fan_out(lines, params, |proxy, line| {
        process_line(proxy, line, lines.len(), pivot, done, params, &counters);
    });
    counters.into_stats(lines.len(), started.elapsed(), connection_error)
}

/// Queue every item on a channel, then drain it with up to `params.workers` scoped threads, each
/// holding one worker proxy. Returns the first connection (or spawn) error.
fn fan_out<T, F>(items: &[T], params: &RoundParams<'_>, handle: F) -> Option<String>
where
    T: Sync,
    F: Fn(&mut Proxy, &T) + Sync,
{
    if items.is_empty() {
        return None;
    }
    let first_error: Mutex<Option<String>> = Mutex::new(None);
    let (tx, rx) = bounded::<&T>(items.len());
    for item in items {
        let _ = tx.send(item);
    }
    drop(tx);

    let workers = params.workers.clamp(1, items.len());
    thread::scope(|scope| {
        for worker in 0..workers {
            let rx = rx.clone();
            let first_error = &first_error;
            let handle = &handle;
            let spawned = thread::Builder::new()
                .name(format!("worker-{worker}"))
                .spawn_scoped(scope, move || worker_loop(worker, rx, params, first_error, handle));
            if let Err(e) = spawned {
                first_error
                    .lock()
                    .get_or_insert_with(|| format!("spawn worker {worker}: {e}"));
            }
        }
    });
    first_error.into_inner()
}

fn worker_loop<T, F>(
    worker: usize,
    rx: Receiver<&T>,
    params: &RoundParams<'_>,
    first_error: &Mutex<Option<String>>,
    handle: &F,
) where
    F: Fn(&mut Proxy, &T),
{
    let mut proxy = match params.pool.worker_proxy(worker) {
        Ok(p) => p,
        Err(fault) => {
            let err = anyhow::Error::new(fault).context(format!("worker {worker} could not connect"));
            params
                .logger
                .log_exception(&err, &params.run.properties(), Some(&params.run.job_name));
            first_error.lock().get_or_insert_with(|| format!("{err:#}"));
            return;
        }
    };
    while let Ok(item) = rx.recv() {
        handle(&mut proxy, item);
    }
}

/// Progress message every few items, and a bar tick.
fn note_progress(total: usize, params: &RoundParams<'_>, counters: &RoundCounters) {
    let seen = RoundCounters::bump(&counters.seen);
    if seen % ProgressConsts::LOG_INTERVAL == 0 {
        params
            .logger
            .log_message(&format!("Processing record {seen} / {total}"), Some(&params.run.job_name));
    }
    if let Some(bar) = params.progress {
        update_progress_bar(bar, 1);
    }
}

/// Why an item ended up failed.
struct Failure {
    err: anyhow::Error,
    metrics: Properties,
    outcome: Outcome,
}

/// Call `attempt` until it succeeds, fails permanently, or runs out of in-place retries for
/// transient faults. Returns the metrics of the successful attempt.
fn with_transient_retries(
    params: &RoundParams<'_>,
    counters: &RoundCounters,
    mut attempt: impl FnMut() -> (anyhow::Result<()>, Properties),
) -> Result<Properties, Failure> {
    let mut retries = 0u32;
    loop {
        let (result, mut metrics) = attempt();
        let err = match result {
            Ok(()) => return Ok(metrics),
            Err(err) => err,
        };

        let fault = as_remote_fault(&err);
        if let Some(f) = fault {
            metrics.extend(f.details());
        }
        if !fault.is_some_and(RemoteFault::is_transient) {
            return Err(Failure {
                err,
                metrics,
                outcome: Outcome::Failed,
            });
        }
        if retries < params.transient_retry_limit {
            retries += 1;
            RoundCounters::bump(&counters.transient_retries);
            params.backoff.apply(fault, params.logger);
            continue;
        }
        metrics.insert("Record.TransientRetries".into(), retries.to_string());
        return Err(Failure {
            err: err.context(format!("gave up after {retries} transient retries")),
            metrics,
            outcome: Outcome::TransientExhausted,
        });
    }
}

fn process_record(
    proxy: &mut Proxy,
    record: &Record,
    total: usize,
    params: &RoundParams<'_>,
    counters: &RoundCounters,
) -> Outcome {
    note_progress(total, params, counters);
    if params.processed.is_some_and(|done| done.contains(&record.id)) {
        RoundCounters::bump(&counters.skipped);
        return Outcome::Skipped;
    }
    RoundCounters::bump(&counters.attempted);

    let attempt = with_transient_retries(params, counters, || {
        let mut ctx = ExecutionContext::new(&mut *proxy, record);
        let result = params.job.process(&mut ctx);
        (result, ctx.into_metrics())
    });
    match attempt {
        Ok(metrics) => record_success(record, metrics, params, counters),
        Err(failure) => {
            RoundCounters::bump(&counters.failed);
            params
                .logger
                .log_failure(&failure.err, Some(record), &failure.metrics, &params.run.job_name);
            failure.outcome
        }
    }
}

fn record_success(
    record: &Record,
    metrics: Properties,
    params: &RoundParams<'_>,
    counters: &RoundCounters,
) -> Outcome {
    let job_name = params.run.job_name.as_str();
    if let Some(log) = params.checkpoint
        && let Err(e) = log.write(&record.id)
    {
        RoundCounters::bump(&counters.failed);
        let err = anyhow::Error::new(e).context("record processed but not checkpointed");
        params.logger.log_failure(&err, Some(record), &metrics, job_name);
        return Outcome::Failed;
    }
    RoundCounters::bump(&counters.succeeded);
    params
        .logger
        .log_success("Record processed with success!", record, &metrics, job_name);
    Outcome::Succeeded
}

fn process_line(
    proxy: &mut Proxy,
    line: &InputLine,
    total: usize,
    pivot: &PivotLog,
    done: &HashSet<String>,
    params: &RoundParams<'_>,
    counters: &RoundCounters,
) -> Outcome {
    note_progress(total, params, counters);
    if done.contains(&line.raw) {
        RoundCounters::bump(&counters.skipped);
        return Outcome::Skipped;
    }
    RoundCounters::bump(&counters.attempted);
    let job_name = params.run.job_name.as_str();

    let mut found: Option<Record> = None;
    let attempt = with_transient_retries(params, counters, || {
        let record = match params.job.search_record(&mut *proxy, &line.fields) {
            Ok(r) => r,
            Err(e) => return (Err(e.context(format!("search record for line {}", line.number))), line.properties()),
        };
        let mut ctx = ExecutionContext::new(&mut *proxy, &record);
        let result = params.job.process_line(&mut ctx, &line.fields);
        let mut metrics = ctx.into_metrics();
        metrics.extend(line.properties());
        found = Some(record);
        (result, metrics)
    });

    let record_id = found.as_ref().map(|r| r.id.as_str());
    match attempt {
        Ok(metrics) => {
            if let Err(e) = pivot.write_outcome(line, record_id, LineOutcome::Ok, "Success") {
                RoundCounters::bump(&counters.failed);
                let err = anyhow::Error::new(e).context("line processed but its outcome was not recorded");
                params.logger.log_failure(&err, found.as_ref(), &metrics, job_name);
                return Outcome::Failed;
            }
            RoundCounters::bump(&counters.succeeded);
            if let Some(record) = &found {
                params
                    .logger
                    .log_success("Record processed with success!", record, &metrics, job_name);
            }
            Outcome::Succeeded
        }
        Err(failure) => {
            RoundCounters::bump(&counters.failed);
            params
                .logger
                .log_failure(&failure.err, found.as_ref(), &failure.metrics, job_name);
            let details = format!("{:#}", failure.err);
            if let Err(e) = pivot.write_outcome(line, record_id, LineOutcome::Ko, &details) {
                params
                    .logger
                    .log_exception(&anyhow::Error::new(e), &line.properties(), Some(job_name));
            }
            failure.outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::sqlite::{insert_records, open_store};
    use crate::connector::{AuthMode, PoolOptions, SqliteConnector};
    use crate::jobs::ExecutionMode;
    use crate::logging::{LogLevel, StdLogger};
    use crate::types::Criterion;
    use std::sync::Arc;

    struct TouchJob;

    impl DataJob for TouchJob {
        fn name(&self) -> &str {
            "Touch"
        }

        fn type_name(&self) -> &str {
            "Touch"
        }

        fn mode(&self) -> ExecutionMode {
            ExecutionMode::BoundedScan
        }

        fn selection_criterion(&self, _caller_id: &str) -> Criterion {
            Criterion::new("task")
        }

        fn process(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
            ctx.push_metric("Touched", "true");
            Ok(())
        }
    }

    #[test]
    fn test_checkpoint_timeout_counts_as_record_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store.db");
        let records = vec![Record::new("task", "a"), Record::new("task", "b")];
        insert_records(&mut open_store(&store).unwrap(), &records).unwrap();
        let logger: Arc<dyn JobLogger> = Arc::new(StdLogger::new(LogLevel::ErrorsOnly));
        let pool = ConnectionPool::connect(
            Arc::new(SqliteConnector::new(&store, AuthMode::OAuth)),
            PoolOptions::default().without_delays(),
            Arc::clone(&logger),
        )
        .unwrap();
        let log = CheckpointLog::new(dir.path().join("Touch.txt"), Duration::from_millis(20));
        log.create().unwrap();
        let run = RunContext::new("Run-test", "Touch", "Touch", 2, 10, Duration::from_secs(60), "caller");
        let params = RoundParams {
            job: &TouchJob,
            pool: &pool,
            run: &run,
            logger: logger.as_ref(),
            checkpoint: Some(&log),
            processed: None,
            workers: 2,
            backoff: BackoffPolicy::none(),
            transient_retry_limit: 0,
            progress: None,
        };

        let stats = {
            let _held = log.hold_lock();
            run_round(&records, &params)
        };

        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.succeeded, 0);
        assert_eq!(stats.failed, 2);
        assert!(stats.all_attempted());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_round_stats_predicates() {
        let stats = RoundStats {
            total: 4,
            attempted: 3,
            failed: 3,
            skipped: 1,
            ..RoundStats::default()
        };
        assert!(stats.all_attempted());
        assert!(stats.all_failed());

        let partial = RoundStats {
            total: 4,
            attempted: 1,
            ..RoundStats::default()
        };
        assert_eq!(partial.unattempted(), 3);
        assert!(!partial.all_failed());
        assert!(!RoundStats::default().all_failed());
    }
}
