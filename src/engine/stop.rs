//! Stop rules for iterative drain, as named predicates evaluated in a fixed order:
//! drained (checked right after retrieval), then stagnation, time budget, full failure, interrupt.

use std::fmt;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Selection came back empty.
    Drained,
    /// Same short page twice in a row: processing is not shrinking the selection.
    Stagnation,
    /// Wall-clock budget used up.
    BudgetExhausted,
    /// Every record of the last round failed.
    AllFailed,
    /// Operator asked to stop.
    Interrupted,
    /// Bounded scan went through its whole selection.
    ScanCompleted,
}

impl StopReason {
    /// Run outcome for this reason.
    pub fn completed(self) -> bool {
        !matches!(self, StopReason::AllFailed | StopReason::Interrupted)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Drained => "No more data to process",
            StopReason::Stagnation => "Infinite loop detected",
            StopReason::BudgetExhausted => "Max duration reached",
            StopReason::AllFailed => "Every record of the round failed",
            StopReason::Interrupted => "Interrupted by operator",
            StopReason::ScanCompleted => "Selection fully processed",
        };
        f.write_str(s)
    }
}

/// What the drain loop knows after a round.
#[derive(Clone, Copy, Debug)]
pub struct RoundObservation {
    pub last_count: usize,
    pub count: usize,
    pub page_size: usize,
    pub elapsed: Duration,
    pub max_duration: Duration,
    pub attempted: usize,
    pub failed: usize,
    pub interrupted: bool,
}

pub fn is_drained(count: usize) -> bool {
    count == 0
}

/// Two consecutive short pages of the same size.
pub fn is_stagnant(last_count: usize, count: usize, page_size: usize) -> bool {
    last_count < page_size && last_count == count
}

pub fn budget_exhausted(elapsed: Duration, max_duration: Duration) -> bool {
    elapsed >= max_duration
}

pub fn round_all_failed(attempted: usize, failed: usize) -> bool {
    attempted > 0 && failed == attempted
}

/// First matching rule after a processed round, or `None` to requery.
pub fn decide_after_round(obs: &RoundObservation) -> Option<StopReason> {
    if is_stagnant(obs.last_count, obs.count, obs.page_size) {
        return Some(StopReason::Stagnation);
    }
    if budget_exhausted(obs.elapsed, obs.max_duration) {
        return Some(StopReason::BudgetExhausted);
    }
    if round_all_failed(obs.attempted, obs.failed) {
        return Some(StopReason::AllFailed);
    }
    if obs.interrupted {
        return Some(StopReason::Interrupted);
    }
    None
}
