//! Job settings: defaults, `recsweep.toml` overlay, validation, and the option structs the pool
//! and engine consume. CLI overrides are applied by the command handler.

use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::connector::proxy::ProxyRetry;
use crate::connector::{AuthMode, BackoffPolicy, PoolOptions, RetryPolicy, RetryStrategy, TransportTuning};
use crate::engine::EngineOptions;
use crate::logging::{LogLevel, Properties};
use crate::utils::config::{Defaults, PackagePaths, new_run_id};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SettingsFile {
    #[serde(default)]
    connection: ConnectionSection,
    #[serde(default)]
    process: ProcessSection,
    #[serde(default)]
    retry: RetrySection,
    #[serde(default)]
    jobs: JobsSection,
}

#[derive(Debug, Default, Deserialize)]
struct ConnectionSection {
    endpoint: Option<String>,
    auth_mode: Option<AuthMode>,
    principal: Option<String>,
    secret: Option<String>,
    caller_id: Option<String>,
    max_connections: Option<usize>,
    io_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessSection {
    threads: Option<usize>,
    page_size: Option<usize>,
    max_run_hours: Option<f64>,
    log_level: Option<LogLevel>,
    checkpoint_dir: Option<String>,
    checkpoint_lock_timeout_ms: Option<u64>,
    verbose: Option<bool>,
    progress: Option<bool>,
    input_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrySection {
    backoff_min_secs: Option<u64>,
    backoff_max_secs: Option<u64>,
    proxy_attempts: Option<u32>,
    connect_attempts: Option<u32>,
    connect_step_ms: Option<u64>,
    retrieval_attempts: Option<u32>,
    retrieval_wait_secs: Option<u64>,
    retrieval_strategy: Option<RetryStrategy>,
    transient_retry_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct JobsSection {
    names: Option<Vec<String>>,
}

/// Everything a run needs to know. Build with [`JobSettings::load`], override, then [`validate`](Self::validate).
#[derive(Clone, Debug)]
pub struct JobSettings {
    pub run_id: String,

    pub endpoint: Option<PathBuf>,
    pub auth_mode: AuthMode,
    pub principal: Option<String>,
    pub secret: Option<String>,
    pub caller_id: Option<String>,
    pub max_connections: usize,
    pub io_timeout: Duration,

    pub threads: usize,
    pub page_size: usize,
    pub max_run_hours: f64,
    pub log_level: LogLevel,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_lock_timeout: Duration,
    pub verbose: bool,
    pub progress: bool,
    /// Input file for input-file jobs; overrides the job's own.
    pub input_file: Option<PathBuf>,

    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub proxy_attempts: u32,
    pub connect_attempts: u32,
    pub connect_step: Duration,
    pub retrieval_attempts: u32,
    pub retrieval_wait: Duration,
    pub retrieval_strategy: RetryStrategy,
    pub transient_retry_limit: u32,

    pub job_names: Vec<String>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            run_id: new_run_id(),
            endpoint: None,
            auth_mode: AuthMode::default(),
            principal: None,
            secret: None,
            caller_id: None,
            max_connections: Defaults::CONNECTION_LIMIT,
            io_timeout: Duration::from_secs(Defaults::IO_TIMEOUT_SECS),
            threads: Defaults::THREADS,
            page_size: Defaults::PAGE_SIZE,
            max_run_hours: Defaults::MAX_RUN_HOURS,
            log_level: LogLevel::default(),
            checkpoint_dir: PathBuf::from(Defaults::CHECKPOINT_DIR),
            checkpoint_lock_timeout: Duration::from_millis(Defaults::CHECKPOINT_LOCK_TIMEOUT_MS),
            verbose: false,
            progress: false,
            input_file: None,
            backoff_min: Duration::from_secs(Defaults::BACKOFF_MIN_SECS),
            backoff_max: Duration::from_secs(Defaults::BACKOFF_MAX_SECS),
            proxy_attempts: Defaults::PROXY_ATTEMPTS,
            connect_attempts: Defaults::CONNECT_ATTEMPTS,
            connect_step: Duration::from_millis(Defaults::CONNECT_STEP_MS),
            retrieval_attempts: Defaults::RETRIEVAL_ATTEMPTS,
            retrieval_wait: Duration::from_secs(Defaults::RETRIEVAL_WAIT_SECS),
            retrieval_strategy: RetryStrategy::Exponential,
            transient_retry_limit: Defaults::TRANSIENT_RETRY_LIMIT,
            job_names: Vec::new(),
        }
    }
}

/// Overwrite settings field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $settings:expr, $sec_field:ident => $settings_field:ident) => {
        if let Some(v) = $sec.$sec_field.clone() {
            $settings.$settings_field = v;
        }
    };
    ($sec:expr, $settings:expr, $sec_field:ident => $settings_field:ident, $conv:expr) => {
        if let Some(v) = $sec.$sec_field.clone() {
            $settings.$settings_field = $conv(v);
        }
    };
}

fn parse_settings_file(path: &Path) -> Result<SettingsFile, SettingsError> {
    let s = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl JobSettings {
    /// Defaults overlaid with `explicit` (must exist) or `<dir>/recsweep.toml` (optional).
    pub fn load(dir: &Path, explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let p = dir.join(PackagePaths::get().settings_filename());
                p.is_file().then_some(p)
            }
        };
        if let Some(path) = path {
            let file = parse_settings_file(&path)?;
            settings.apply_file(&file);
            log::debug!("Loaded settings from {}", path.display());
        }
        Ok(settings)
    }

    /// Parse settings from TOML text (defaults for anything missing).
    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        let file: SettingsFile = toml::from_str(s).map_err(|source| SettingsError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let mut settings = Self::default();
        settings.apply_file(&file);
        Ok(settings)
    }

    pub(crate) fn apply_file(&mut self, file: &SettingsFile) {
        let c = &file.connection;
        apply_file_opt!(c, self, endpoint => endpoint, |v: String| Some(PathBuf::from(v)));
        apply_file_opt!(c, self, auth_mode => auth_mode);
        apply_file_opt!(c, self, principal => principal, Some);
        apply_file_opt!(c, self, secret => secret, Some);
        apply_file_opt!(c, self, caller_id => caller_id, Some);
        apply_file_opt!(c, self, max_connections => max_connections);
        apply_file_opt!(c, self, io_timeout_secs => io_timeout, Duration::from_secs);

        let p = &file.process;
        apply_file_opt!(p, self, threads => threads);
        apply_file_opt!(p, self, page_size => page_size);
        apply_file_opt!(p, self, max_run_hours => max_run_hours);
        apply_file_opt!(p, self, log_level => log_level);
        apply_file_opt!(p, self, checkpoint_dir => checkpoint_dir, PathBuf::from);
        apply_file_opt!(p, self, checkpoint_lock_timeout_ms => checkpoint_lock_timeout, Duration::from_millis);
        apply_file_opt!(p, self, verbose => verbose);
        apply_file_opt!(p, self, progress => progress);
        apply_file_opt!(p, self, input_file => input_file, |v: String| Some(PathBuf::from(v)));

        let r = &file.retry;
        apply_file_opt!(r, self, backoff_min_secs => backoff_min, Duration::from_secs);
        apply_file_opt!(r, self, backoff_max_secs => backoff_max, Duration::from_secs);
        apply_file_opt!(r, self, proxy_attempts => proxy_attempts);
        apply_file_opt!(r, self, connect_attempts => connect_attempts);
        apply_file_opt!(r, self, connect_step_ms => connect_step, Duration::from_millis);
        apply_file_opt!(r, self, retrieval_attempts => retrieval_attempts);
        apply_file_opt!(r, self, retrieval_wait_secs => retrieval_wait, Duration::from_secs);
        apply_file_opt!(r, self, retrieval_strategy => retrieval_strategy);
        apply_file_opt!(r, self, transient_retry_limit => transient_retry_limit);

        apply_file_opt!(file.jobs, self, names => job_names);
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        fn invalid(key: &'static str, reason: impl Into<String>) -> Result<(), SettingsError> {
            Err(SettingsError::Invalid {
                key,
                reason: reason.into(),
            })
        }
        if self.threads == 0 {
            return invalid("process.threads", "must be at least 1");
        }
        if self.page_size == 0 {
            return invalid("process.page_size", "must be at least 1");
        }
        if !self.max_run_hours.is_finite() || self.max_run_hours < 0.0 {
            return invalid("process.max_run_hours", "must be a non-negative number of hours");
        }
        if self.checkpoint_lock_timeout.is_zero() {
            return invalid("process.checkpoint_lock_timeout_ms", "must be positive");
        }
        if self.backoff_min > self.backoff_max {
            return invalid(
                "retry.backoff_min_secs",
                format!(
                    "minimum {}s is above maximum {}s",
                    self.backoff_min.as_secs(),
                    self.backoff_max.as_secs()
                ),
            );
        }
        if self.proxy_attempts == 0 {
            return invalid("retry.proxy_attempts", "must be at least 1");
        }
        if self.connect_attempts == 0 {
            return invalid("retry.connect_attempts", "must be at least 1");
        }
        if self.retrieval_attempts == 0 {
            return invalid("retry.retrieval_attempts", "must be at least 1");
        }
        if self.max_connections == 0 {
            return invalid("connection.max_connections", "must be at least 1");
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_min, self.backoff_max)
            .unwrap_or_else(|| BackoffPolicy::fixed(self.backoff_max))
    }

    pub fn max_run_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_run_hours * 3600.0)
    }

    /// Store file: configured endpoint, else `recsweep.db` in `dir`.
    pub fn endpoint_or_default(&self, dir: &Path) -> PathBuf {
        self.endpoint
            .clone()
            .unwrap_or_else(|| dir.join(PackagePaths::get().store_filename()))
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            connect_retry: RetryPolicy::new(self.connect_attempts, self.connect_step, RetryStrategy::Linear),
            proxy_retry: ProxyRetry {
                attempts: self.proxy_attempts,
                backoff: self.backoff(),
            },
            caller_id: self.caller_id.clone(),
            tuning: TransportTuning {
                max_connections: self.max_connections,
                io_timeout: self.io_timeout,
                ..TransportTuning::default()
            },
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            run_id: self.run_id.clone(),
            threads: self.threads,
            page_size: self.page_size,
            max_run_duration: self.max_run_duration(),
            checkpoint_dir: self.checkpoint_dir.clone(),
            checkpoint_lock_timeout: self.checkpoint_lock_timeout,
            record_backoff: self.backoff(),
            transient_retry_limit: self.transient_retry_limit,
            retrieval_retry: RetryPolicy::new(
                self.retrieval_attempts,
                self.retrieval_wait,
                self.retrieval_strategy,
            ),
            show_progress: self.progress,
            input_file: self.input_file.clone(),
        }
    }

    /// Settings as log properties; the secret is redacted.
    pub fn properties(&self) -> Properties {
        let mut p = Properties::new();
        let mut put = |k: &str, v: String| {
            p.insert(format!("Settings.{k}"), v);
        };
        put("RunId", self.run_id.clone());
        put(
            "Endpoint",
            self.endpoint
                .as_ref()
                .map(|e| e.display().to_string())
                .unwrap_or_default(),
        );
        put("AuthMode", self.auth_mode.to_string());
        put("Principal", self.principal.clone().unwrap_or_default());
        put("Secret", if self.secret.is_some() { "***".into() } else { String::new() });
        put("CallerId", self.caller_id.clone().unwrap_or_default());
        put("Threads", self.threads.to_string());
        put("PageSize", self.page_size.to_string());
        put("MaxRunHours", self.max_run_hours.to_string());
        put("LogLevel", self.log_level.to_string());
        put("CheckpointDir", self.checkpoint_dir.display().to_string());
        put(
            "Backoff",
            format!("{}-{}s", self.backoff_min.as_secs(), self.backoff_max.as_secs()),
        );
        put(
            "InputFile",
            self.input_file
                .as_ref()
                .map(|f| f.display().to_string())
                .unwrap_or_default(),
        );
        put("Jobs", self.job_names.join(","));
        p
    }
}
