//! Wait-then-retry policies: random backoff for throttling, bounded retry for setup and retrieval.

use rand::Rng;
use serde::Deserialize;
use std::thread;
use std::time::Duration;

use super::RemoteFault;
use crate::logging::JobLogger;

/// Uniform random sleep within `[min, max]` applied after a throttling fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(Self::DEFAULT_MIN_SECS),
            max: Duration::from_secs(Self::DEFAULT_MAX_SECS),
        }
    }
}

impl BackoffPolicy {
    pub const DEFAULT_MIN_SECS: u64 = 30;
    pub const DEFAULT_MAX_SECS: u64 = 60;

    /// `None` when `min > max`.
    pub fn new(min: Duration, max: Duration) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    /// No sleep at all.
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// Pick a delay in `[min, max]` (millisecond resolution).
    pub fn delay(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    /// Sleep the calling thread for [`delay`](Self::delay). Returns the time slept.
    pub fn apply(&self, fault: Option<&RemoteFault>, logger: &dyn JobLogger) -> Duration {
        let delay = self.delay();
        let current = thread::current();
        let name = current.name().map(str::to_string).unwrap_or_else(|| format!("{:?}", current.id()));
        let reason = fault.map(|f| f.to_string()).unwrap_or_else(|| "throttled".into());
        logger.log_message(
            &format!(
                "API limit reached ({reason})! Current thread '{name}' will wait during {:.1} seconds",
                delay.as_secs_f64()
            ),
            None,
        );
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        delay
    }
}

/// How the wait between retry attempts grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Same wait every time.
    Fixed,
    /// `wait * attempt`.
    #[default]
    Linear,
    /// `wait * 2^(attempt - 1)`.
    Exponential,
}

/// Bounded retry: up to `max_attempts` tries, sleeping between them per `strategy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    /// Upper bound for any single wait.
    pub const MAX_WAIT: Duration = Duration::from_secs(600);

    pub fn new(max_attempts: u32, wait: Duration, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts,
            wait,
            strategy,
        }
    }

    /// Retry without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, RetryStrategy::Fixed)
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn wait_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let wait = match self.strategy {
            RetryStrategy::Fixed => self.wait,
            RetryStrategy::Linear => self.wait.saturating_mul(attempt),
            RetryStrategy::Exponential => {
                self.wait.saturating_mul(2u32.saturating_pow(attempt - 1))
            }
        };
        wait.min(Self::MAX_WAIT)
    }

    /// Run `op` until it succeeds or the attempt budget is spent. `on_error` sees every failed
    /// attempt (including the last). The last error is returned unchanged.
    pub fn run<T, E, F, H>(&self, mut op: F, mut on_error: H) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        H: FnMut(&E, u32),
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    on_error(&e, attempt);
                    if attempt >= max {
                        return Err(e);
                    }
                    let wait = self.wait_for(attempt);
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
