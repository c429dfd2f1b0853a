use colored::Colorize;
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;
use std::thread;

use crate::logging::LogLevel;

/// Crate filter for a job log level. `--verbose` always opens debug output.
fn crate_filter(level: LogLevel, verbose: bool) -> LevelFilter {
    if verbose {
        return LevelFilter::Debug;
    }
    match level {
        LogLevel::Verbose => LevelFilter::Debug,
        LogLevel::Information | LogLevel::ErrorsAndSuccess => LevelFilter::Info,
        LogLevel::ErrorsOnly => LevelFilter::Warn,
    }
}

/// Install the env_logger backend. Lines from round workers carry the worker's thread name.
/// Later calls are no-ops.
pub fn setup_logging(level: LogLevel, verbose: bool) {
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), crate_filter(level, verbose))
        .format(|buf, record| {
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f").to_string().dimmed();
            let current = thread::current();
            let worker = current
                .name()
                .filter(|n| n.starts_with("worker-"))
                .map(|n| format!(" {}", n.blue()))
                .unwrap_or_default();
            let tag = match record.level() {
                Level::Error => " ERROR".red().to_string(),
                Level::Warn => " WARN".yellow().to_string(),
                Level::Debug | Level::Trace => " debug".dimmed().to_string(),
                Level::Info => String::new(),
            };
            writeln!(
                buf,
                "[{} {}{}{}] {}",
                env!("CARGO_PKG_NAME").cyan(),
                stamp,
                worker,
                tag,
                record.args()
            )
        })
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_filter_follows_job_level() {
        assert_eq!(crate_filter(LogLevel::Information, false), LevelFilter::Info);
        assert_eq!(crate_filter(LogLevel::ErrorsOnly, false), LevelFilter::Warn);
        assert_eq!(crate_filter(LogLevel::ErrorsOnly, true), LevelFilter::Debug);
    }
}
