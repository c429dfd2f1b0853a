//! Shared fixtures: an in-memory record store with fault injection, scripted jobs, a recording logger.
#![allow(dead_code)]

use parking_lot::Mutex;
use recsweep::connector::{AuthToken, SessionInfo, TransportTuning};
use recsweep::{
    AttributeMap, AttributeValue, AuthMode, ConnectionPool, Connector, Criterion, DataJob,
    EngineOptions, ExecutionContext, ExecutionMode, JobLogger, PoolOptions, Properties, Record,
    RecordPage, RemoteFault, RemoteService, Request, Response,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

// --- store ---

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
    /// Ids returned by each retrieve call, in order.
    retrievals: Mutex<Vec<Vec<String>>>,
    generation: AtomicU64,
    pub authentications: AtomicUsize,
    pub opens: AtomicUsize,
    /// Logins left to refuse.
    pub fail_logins: AtomicUsize,
    /// Refuse every session open while set.
    pub fail_opens: AtomicBool,
    /// Retrieve calls left to throttle.
    pub throttle_retrievals: AtomicUsize,
    /// Delete calls left to throttle.
    pub throttle_deletes: AtomicUsize,
    /// Delete calls that reached the store.
    pub delete_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_records(records: Vec<Record>) -> Arc<Self> {
        let store = Self::default();
        *store.records.lock() = records;
        Arc::new(store)
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn retrievals(&self) -> Vec<Vec<String>> {
        self.retrievals.lock().clone()
    }

    /// Invalidate every issued token.
    pub fn expire_tokens(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

pub struct MemoryConnector {
    pub store: Arc<MemoryStore>,
    mode: AuthMode,
}

impl MemoryConnector {
    pub fn new(store: &Arc<MemoryStore>, mode: AuthMode) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::clone(store),
            mode,
        })
    }
}

impl Connector for MemoryConnector {
    fn auth_mode(&self) -> AuthMode {
        self.mode
    }

    fn apply_tuning(&self, _tuning: &TransportTuning) {}

    fn authenticate(&self) -> Result<AuthToken, RemoteFault> {
        self.store.authentications.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .store
            .fail_logins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RemoteFault::Connection("login refused".into()));
        }
        Ok(AuthToken {
            value: self.store.current().to_string(),
            caller_id: "caller-1".into(),
            issued_at: Instant::now(),
        })
    }

    fn open(&self, token: &AuthToken) -> Result<Box<dyn RemoteService>, RemoteFault> {
        self.store.opens.fetch_add(1, Ordering::SeqCst);
        if self.store.fail_opens.load(Ordering::SeqCst) {
            return Err(RemoteFault::Connection("no connection slots".into()));
        }
        let generation: u64 = token.value.parse().unwrap_or(u64::MAX);
        if generation != self.store.current() {
            return Err(RemoteFault::TokenExpired("stale token".into()));
        }
        Ok(Box::new(MemorySession {
            store: Arc::clone(&self.store),
            generation,
            caller_id: token.caller_id.clone(),
        }))
    }
}

struct MemorySession {
    store: Arc<MemoryStore>,
    generation: u64,
    caller_id: String,
}

impl MemorySession {
    fn check(&self) -> Result<(), RemoteFault> {
        if self.generation != self.store.current() {
            return Err(RemoteFault::TokenExpired("stale token".into()));
        }
        Ok(())
    }
}

impl RemoteService for MemorySession {
    fn retrieve_multiple(&self, criterion: &Criterion) -> Result<RecordPage, RemoteFault> {
        self.check()?;
        let throttled = self
            .store
            .throttle_retrievals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(RemoteFault::rate_limited());
        }
        let page = criterion.apply(self.store.records.lock().clone());
        self.store
            .retrievals
            .lock()
            .push(page.records.iter().map(|r| r.id.clone()).collect());
        Ok(page)
    }

    fn create(&self, record: &Record) -> Result<String, RemoteFault> {
        self.check()?;
        self.store.records.lock().push(record.clone());
        Ok(record.id.clone())
    }

    fn update(&self, record: &Record) -> Result<(), RemoteFault> {
        self.check()?;
        let mut records = self.store.records.lock();
        let stored = records
            .iter_mut()
            .find(|r| r.kind == record.kind && r.id == record.id)
            .ok_or_else(|| RemoteFault::NotFound {
                kind: record.kind.clone(),
                id: record.id.clone(),
            })?;
        stored
            .attributes
            .extend(record.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), RemoteFault> {
        self.check()?;
        self.store.delete_calls.fetch_add(1, Ordering::SeqCst);
        let throttled = self
            .store
            .throttle_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(RemoteFault::rate_limited());
        }
        let mut records = self.store.records.lock();
        let before = records.len();
        records.retain(|r| !(r.kind == kind && r.id == id));
        if records.len() == before {
            return Err(RemoteFault::NotFound {
                kind: kind.into(),
                id: id.into(),
            });
        }
        Ok(())
    }

    fn execute(&self, request: &Request) -> Result<Response, RemoteFault> {
        self.check()?;
        let mut results = AttributeMap::new();
        results.insert("UserId".into(), AttributeValue::text(self.caller_id.clone()));
        Ok(Response {
            name: request.name.clone(),
            results,
        })
    }

    fn who_am_i(&self) -> Result<String, RemoteFault> {
        self.check()?;
        Ok(self.caller_id.clone())
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            endpoint_url: "memory://store".into(),
            display_name: "memory".into(),
        }
    }
}

// --- jobs ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Delete,
    Noop,
    Fail,
    /// Every call is throttled.
    Throttle,
}

/// Job over `task` records with a scripted action. Ids in `flaky` are throttled on their first
/// call; ids in `failing` always fail.
pub struct ScriptedJob {
    pub mode: ExecutionMode,
    pub action: Action,
    pub type_name: String,
    pub threads: Option<usize>,
    pub flaky: HashSet<String>,
    pub failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
    pub pre_ran: AtomicBool,
    pub post_ran: AtomicBool,
}

impl ScriptedJob {
    pub fn new(mode: ExecutionMode, action: Action) -> Self {
        Self {
            mode,
            action,
            type_name: "ScriptedJob".into(),
            threads: None,
            flaky: HashSet::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            pre_ran: AtomicBool::new(false),
            post_ran: AtomicBool::new(false),
        }
    }

    pub fn single_threaded(mut self) -> Self {
        self.threads = Some(1);
        self
    }

    pub fn flaky_on(mut self, ids: &[&str]) -> Self {
        self.flaky = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing_on(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Every process call, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_per_id(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for id in self.calls.lock().iter() {
            *counts.entry(id.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl DataJob for ScriptedJob {
    fn name(&self) -> &str {
        "Scripted job"
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn selection_criterion(&self, _caller_id: &str) -> Criterion {
        Criterion::new("task").order_by("n", false)
    }

    fn thread_override(&self) -> Option<usize> {
        self.threads
    }

    fn pre_operation(&self, _main: &mut recsweep::Proxy) -> anyhow::Result<()> {
        self.pre_ran.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn post_operation(&self, _main: &mut recsweep::Proxy) -> anyhow::Result<()> {
        self.post_ran.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn process(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        let record = ctx.record();
        let first_call = {
            let mut calls = self.calls.lock();
            let first = !calls.contains(&record.id);
            calls.push(record.id.clone());
            first
        };
        if first_call && self.flaky.contains(&record.id) {
            return Err(RemoteFault::rate_limited().into());
        }
        if self.failing.contains(&record.id) {
            anyhow::bail!("{} is locked by another process", record.id);
        }
        match self.action {
            Action::Delete => ctx.proxy().delete(&record.kind, &record.id)?,
            Action::Noop => {}
            Action::Fail => anyhow::bail!("cannot process {}", record.id),
            Action::Throttle => return Err(RemoteFault::rate_limited().into()),
        }
        Ok(())
    }
}

// --- logger ---

#[derive(Default)]
pub struct RecordingLogger {
    pub messages: Mutex<Vec<String>>,
    pub successes: AtomicUsize,
    pub failures: Mutex<Vec<String>>,
    pub exceptions: AtomicUsize,
}

impl RecordingLogger {
    pub fn has_message(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

impl JobLogger for RecordingLogger {
    fn log_message(&self, message: &str, _job_name: Option<&str>) {
        self.messages.lock().push(message.to_string());
    }

    fn log_debug(&self, _message: &str) {}

    fn log_event(&self, _name: &str, _properties: &Properties, _job_name: Option<&str>) {}

    fn log_exception(&self, _error: &anyhow::Error, _properties: &Properties, _job_name: Option<&str>) {
        self.exceptions.fetch_add(1, Ordering::SeqCst);
    }

    fn log_success(&self, _message: &str, _record: &Record, _properties: &Properties, _job_name: &str) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn log_failure(
        &self,
        error: &anyhow::Error,
        _record: Option<&Record>,
        _properties: &Properties,
        _job_name: &str,
    ) {
        self.failures.lock().push(format!("{error:#}"));
    }
}

// --- builders ---

/// `task` records `ids[i]` with attribute `n = i` (so ordering by `n` keeps the given order).
pub fn tasks(ids: &[&str]) -> Vec<Record> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| Record::new("task", *id).with("n", AttributeValue::Integer(i as i64)))
        .collect()
}

pub fn connect(
    store: &Arc<MemoryStore>,
    mode: AuthMode,
    logger: &Arc<RecordingLogger>,
) -> ConnectionPool {
    let logger: Arc<dyn JobLogger> = Arc::clone(logger) as Arc<dyn JobLogger>;
    ConnectionPool::connect(
        MemoryConnector::new(store, mode),
        PoolOptions::default().without_delays(),
        logger,
    )
    .expect("connect")
}

pub fn options(checkpoint_dir: &Path, page_size: usize, threads: usize) -> EngineOptions {
    EngineOptions {
        run_id: "Run-test".into(),
        threads,
        page_size,
        max_run_duration: Duration::from_secs(3600),
        checkpoint_dir: checkpoint_dir.to_path_buf(),
        checkpoint_lock_timeout: Duration::from_millis(500),
        ..EngineOptions::default()
    }
    .without_delays()
}
