//! [`JobLogger`] over the `log` facade (env_logger backend set up by `utils::setup_logging`).

use log::{debug, error, info};

use super::{JobLogger, LogLevel, Properties, record_properties, render_properties};
use crate::types::Record;

/// Level-gated logger. Context properties (run id, host, ...) are merged into every
/// event, success, failure and exception line.
pub struct StdLogger {
    level: LogLevel,
    context: Properties,
}

impl StdLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            context: Properties::new(),
        }
    }

    pub fn with_context(mut self, context: Properties) -> Self {
        self.context = context;
        self
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    fn merged(&self, properties: &Properties, job_name: Option<&str>) -> String {
        let mut all = self.context.clone();
        all.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(name) = job_name {
            all.insert("Job.Name".into(), name.to_string());
        }
        render_properties(&all)
    }
}

fn prefixed(message: &str, job_name: Option<&str>) -> String {
    match job_name {
        Some(name) => format!("{name} - {message}"),
        None => message.to_string(),
    }
}

impl JobLogger for StdLogger {
    fn log_message(&self, message: &str, job_name: Option<&str>) {
        if self.level.allows_messages() {
            info!("{}", prefixed(message, job_name));
        }
    }

    fn log_debug(&self, message: &str) {
        if self.level.allows_debug() {
            debug!("{message}");
        }
    }

    fn log_event(&self, name: &str, properties: &Properties, job_name: Option<&str>) {
        if self.level.allows_events() {
            debug!("[event] {name} {}", self.merged(properties, job_name));
        }
    }

    fn log_exception(&self, err: &anyhow::Error, properties: &Properties, job_name: Option<&str>) {
        error!("{} {}", prefixed(&format!("{err:#}"), job_name), self.merged(properties, job_name));
    }

    fn log_success(&self, message: &str, record: &Record, properties: &Properties, job_name: &str) {
        if self.level.allows_success() {
            let mut props = record_properties(Some(record));
            props.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            info!("{} {}", prefixed(message, Some(job_name)), self.merged(&props, Some(job_name)));
        }
    }

    fn log_failure(
        &self,
        err: &anyhow::Error,
        record: Option<&Record>,
        properties: &Properties,
        job_name: &str,
    ) {
        let mut props = record_properties(record);
        props.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        error!(
            "{} {}",
            prefixed(&format!("{err:#}"), Some(job_name)),
            self.merged(&props, Some(job_name))
        );
    }
}
