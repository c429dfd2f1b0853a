//! Job logging contract: levels, structured properties and the [`JobLogger`] trait.
//! [`StdLogger`] is the default sink over the `log` facade.

mod std_logger;

pub use std_logger::StdLogger;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::types::Record;

/// Structured key/value context attached to log calls.
pub type Properties = BTreeMap<String, String>;

/// Verbosity of a [`JobLogger`]. Lower is chattier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Verbose = 0,
    #[default]
    Information = 1,
    ErrorsAndSuccess = 2,
    ErrorsOnly = 3,
}

impl LogLevel {
    pub fn allows_debug(self) -> bool {
        self == LogLevel::Verbose
    }

    pub fn allows_events(self) -> bool {
        self == LogLevel::Verbose
    }

    pub fn allows_messages(self) -> bool {
        self <= LogLevel::Information
    }

    pub fn allows_success(self) -> bool {
        self <= LogLevel::ErrorsAndSuccess
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Verbose => "verbose",
            LogLevel::Information => "information",
            LogLevel::ErrorsAndSuccess => "errors_and_success",
            LogLevel::ErrorsOnly => "errors_only",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    /// Accepts names (`verbose`, `info`, ...) or the numeric levels 0..=3.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "0" | "verbose" | "debug" => Ok(LogLevel::Verbose),
            "1" | "information" | "info" => Ok(LogLevel::Information),
            "2" | "errors_and_success" => Ok(LogLevel::ErrorsAndSuccess),
            "3" | "errors_only" | "errors" => Ok(LogLevel::ErrorsOnly),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Sink for job output. Implementations decide what each level lets through;
/// exceptions and failures are never filtered.
pub trait JobLogger: Send + Sync {
    fn log_message(&self, message: &str, job_name: Option<&str>);
    fn log_debug(&self, message: &str);
    fn log_event(&self, name: &str, properties: &Properties, job_name: Option<&str>);
    fn log_exception(&self, error: &anyhow::Error, properties: &Properties, job_name: Option<&str>);
    fn log_success(&self, message: &str, record: &Record, properties: &Properties, job_name: &str);
    fn log_failure(
        &self,
        error: &anyhow::Error,
        record: Option<&Record>,
        properties: &Properties,
        job_name: &str,
    );
}

/// Identity properties of a record (`Record.Id`, `Record.Kind`), merged into success/failure lines.
pub fn record_properties(record: Option<&Record>) -> Properties {
    let mut props = Properties::new();
    if let Some(r) = record {
        props.insert("Record.Id".into(), r.id.clone());
        props.insert("Record.Kind".into(), r.kind.clone());
    }
    props
}

/// Render properties as `key="value"` pairs separated by spaces.
pub fn render_properties(properties: &Properties) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect::<Vec<_>>()
        .join(" ")
}
