//! Application configuration constants.
//! Defaults, thresholds and package-derived names in one place.

use chrono::{DateTime, Local};
use std::sync::OnceLock;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    settings_filename: String,
    store_filename: String,
    secret_env_key: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                settings_filename: format!("{pkg}.toml"),
                store_filename: format!("{pkg}.db"),
                secret_env_key: format!("{}_SECRET", pkg.to_uppercase()),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    pub fn settings_filename(&self) -> &str {
        &self.settings_filename
    }

    /// Default SQLite store file when no endpoint is configured.
    pub fn store_filename(&self) -> &str {
        &self.store_filename
    }

    /// Environment variable holding the connection secret.
    pub fn secret_env_key(&self) -> &str {
        &self.secret_env_key
    }

    pub fn checkpoint_extension(&self) -> &'static str {
        "txt"
    }
}

// ---- Run defaults ----

/// Default values for every tunable. Overridden by the settings file and CLI.
pub struct Defaults;

impl Defaults {
    pub const THREADS: usize = 10;
    pub const PAGE_SIZE: usize = 2500;
    pub const MAX_RUN_HOURS: f64 = 8.0;
    pub const CHECKPOINT_DIR: &'static str = ".";
    pub const CHECKPOINT_LOCK_TIMEOUT_MS: u64 = 5000;

    pub const BACKOFF_MIN_SECS: u64 = 30;
    pub const BACKOFF_MAX_SECS: u64 = 60;
    /// Attempts per remote call made through a proxy.
    pub const PROXY_ATTEMPTS: u32 = 3;
    pub const CONNECT_ATTEMPTS: u32 = 5;
    pub const CONNECT_STEP_MS: u64 = 2000;
    pub const RETRIEVAL_ATTEMPTS: u32 = 5;
    pub const RETRIEVAL_WAIT_SECS: u64 = 5;
    /// In-place retries of one record after a transient fault.
    pub const TRANSIENT_RETRY_LIMIT: u32 = 5;

    pub const CONNECTION_LIMIT: usize = 65_000;
    pub const IO_TIMEOUT_SECS: u64 = 120;
}

// ---- Progress ----

pub struct ProgressConsts;

impl ProgressConsts {
    /// Log a "Processing record i / n" line every this many records.
    pub const LOG_INTERVAL: usize = 50;
}

// ---- Run id ----

/// `Run-YYYY-MM-DD--HH-MM-SS` for the given local time.
pub fn run_id_at(now: DateTime<Local>) -> String {
    now.format("Run-%Y-%m-%d--%H-%M-%S").to_string()
}

pub fn new_run_id() -> String {
    run_id_at(Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_id_format() {
        let t = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(run_id_at(t), "Run-2024-03-07--09-05-01");
    }

    #[test]
    fn test_package_names() {
        let p = PackagePaths::get();
        assert_eq!(p.settings_filename(), "recsweep.toml");
        assert_eq!(p.secret_env_key(), "RECSWEEP_SECRET");
    }
}
