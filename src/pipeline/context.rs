//! Run-level and record-level context: immutable run metadata shared by workers, and the
//! short-lived per-record execution context that collects metrics.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::connector::Proxy;
use crate::logging::Properties;
use crate::types::{AttributeValue, Record};

/// Immutable per-run metadata. Read-only to workers.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub run_id: String,
    pub job_name: String,
    pub job_type: String,
    pub threads: usize,
    pub page_size: usize,
    pub max_run_duration: Duration,
    pub caller_id: String,
    pub host_name: String,
    pub os: String,
    pub user_name: String,
    pub current_dir: PathBuf,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        job_name: impl Into<String>,
        job_type: impl Into<String>,
        threads: usize,
        page_size: usize,
        max_run_duration: Duration,
        caller_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            job_name: job_name.into(),
            job_type: job_type.into(),
            threads,
            page_size,
            max_run_duration,
            caller_id: caller_id.into(),
            host_name: host_name(),
            os: os_name(),
            user_name: user_name(),
            current_dir: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Run and process context properties merged into structured log lines.
    pub fn properties(&self) -> Properties {
        let mut p = host_properties(
            &self.run_id,
            &self.host_name,
            &self.os,
            &self.user_name,
            &self.current_dir,
        );
        p.insert("Job.Name".into(), self.job_name.clone());
        p.insert("Job.Type".into(), self.job_type.clone());
        p.insert("Job.Threads".into(), self.threads.to_string());
        p.insert("Job.PageSize".into(), self.page_size.to_string());
        p.insert(
            "Job.MaxRunDuration".into(),
            format!("{}s", self.max_run_duration.as_secs()),
        );
        p.insert("Job.CallerId".into(), self.caller_id.clone());
        p
    }
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn os_name() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}

fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

/// Run id plus host, OS, local user and working directory.
pub fn process_properties(run_id: &str) -> Properties {
    host_properties(
        run_id,
        &host_name(),
        &os_name(),
        &user_name(),
        &std::env::current_dir().unwrap_or_default(),
    )
}

fn host_properties(run_id: &str, host: &str, os: &str, user: &str, cwd: &Path) -> Properties {
    let mut p = Properties::new();
    p.insert("Run.Id".into(), run_id.to_string());
    p.insert("Host.Name".into(), host.to_string());
    p.insert("Host.OS".into(), os.to_string());
    p.insert("Host.User".into(), user.to_string());
    p.insert("Host.CurrentDirectory".into(), cwd.display().to_string());
    p
}

/// Result of processing one record. Drives counters and logging only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Already in the checkpoint log.
    Skipped,
    TransientExhausted,
    Failed,
}

/// One record's processing context: the worker's proxy, the record, and metrics gathered while
/// processing. Dropped when the record is done.
pub struct ExecutionContext<'a> {
    proxy: &'a mut Proxy,
    record: &'a Record,
    metrics: Properties,
    started: Instant,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(proxy: &'a mut Proxy, record: &'a Record) -> Self {
        let mut ctx = Self {
            proxy,
            record,
            metrics: Properties::new(),
            started: Instant::now(),
        };
        ctx.push_record_to_metrics();
        ctx.push_proxy_to_metrics();
        ctx
    }

    pub fn proxy(&mut self) -> &mut Proxy {
        self.proxy
    }

    /// The record being processed. Borrow is independent of the context.
    pub fn record(&self) -> &'a Record {
        self.record
    }

    /// Add or replace one metric.
    pub fn push_metric(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metrics.insert(key.into(), value.into());
    }

    pub fn push_metrics<K, V>(&mut self, metrics: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in metrics {
            self.push_metric(k, v);
        }
    }

    /// Scalar attributes as `Record.<name>`; references and option sets are left out.
    fn push_record_to_metrics(&mut self) {
        let record = self.record;
        for (name, value) in &record.attributes {
            if matches!(value, AttributeValue::Reference(_) | AttributeValue::OptionSet(_)) {
                continue;
            }
            self.metrics
                .insert(format!("Record.{name}"), value.display_value());
        }
    }

    fn push_proxy_to_metrics(&mut self) {
        let props = self.proxy.properties();
        self.metrics.extend(props);
    }

    pub fn metrics(&self) -> &Properties {
        &self.metrics
    }

    /// Final metrics, stamped with the processing time.
    pub fn into_metrics(mut self) -> Properties {
        let ms = self.started.elapsed().as_millis();
        self.metrics.insert("Record.ElapsedMs".into(), ms.to_string());
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_properties_come_from_the_context() {
        let mut run = RunContext::new("Run-1", "Purge traces", "PurgeTraces", 4, 250, Duration::from_secs(7200), "caller-9");
        run.host_name = "batch-host".into();
        run.user_name = "svc".into();
        run.current_dir = PathBuf::from("/srv/jobs");

        let p = run.properties();
        assert_eq!(p["Run.Id"], "Run-1");
        assert_eq!(p["Host.Name"], "batch-host");
        assert_eq!(p["Host.User"], "svc");
        assert_eq!(p["Host.CurrentDirectory"], PathBuf::from("/srv/jobs").display().to_string());
        assert_eq!(p["Job.Name"], "Purge traces");
        assert_eq!(p["Job.CallerId"], "caller-9");
        assert_eq!(p["Job.MaxRunDuration"], "7200s");
        assert_eq!(p["Job.Threads"], "4");
    }
}
