//! Authenticated session wrapper. Every remote call goes through a small retry loop that
//! reconnects on expired auth and backs off on throttling.

use parking_lot::RwLock;
use std::sync::Arc;

use super::{AuthToken, BackoffPolicy, Connector, RemoteFault, RemoteService, SessionInfo};
use crate::logging::{JobLogger, Properties};
use crate::types::{Criterion, PageInfo, Record, RecordPage, Request, Response};
use crate::utils::config::Defaults;

/// Retry budget for calls made through a [`Proxy`].
#[derive(Clone, Copy, Debug)]
pub struct ProxyRetry {
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for ProxyRetry {
    fn default() -> Self {
        Self {
            attempts: Defaults::PROXY_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Logical connection: one session plus the means to rebuild it.
pub struct Proxy {
    session: Box<dyn RemoteService>,
    connector: Arc<dyn Connector>,
    shared_token: Arc<RwLock<AuthToken>>,
    info: SessionInfo,
    caller_id: String,
    retry: ProxyRetry,
    logger: Arc<dyn JobLogger>,
    label: String,
    reconnects: usize,
}

impl Proxy {
    pub(crate) fn new(
        session: Box<dyn RemoteService>,
        connector: Arc<dyn Connector>,
        shared_token: Arc<RwLock<AuthToken>>,
        retry: ProxyRetry,
        logger: Arc<dyn JobLogger>,
        label: String,
    ) -> Self {
        let info = session.info();
        let caller_id = shared_token.read().caller_id.clone();
        Self {
            session,
            connector,
            shared_token,
            info,
            caller_id,
            retry,
            logger,
            label,
            reconnects: 0,
        }
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn set_caller_id(&mut self, caller_id: impl Into<String>) {
        self.caller_id = caller_id.into();
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// How many times this proxy rebuilt its session.
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }

    /// Session identity for metrics.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("Proxy.CallerId".into(), self.caller_id.clone());
        props.insert("Proxy.AuthType".into(), self.connector.auth_mode().to_string());
        props.insert("Proxy.Endpoint".into(), self.info.endpoint_url.clone());
        props.insert("Proxy.DisplayName".into(), self.info.display_name.clone());
        props
    }

    /// Log in again and replace the session. Clone-capable modes also refresh the shared token
    /// so later worker proxies start from it.
    fn reconnect(&mut self) -> Result<(), RemoteFault> {
        let token = self.connector.authenticate()?;
        let session = self.connector.open(&token)?;
        if self.connector.auth_mode().supports_clone() {
            *self.shared_token.write() = token;
        }
        self.info = session.info();
        self.session = session;
        self.reconnects += 1;
        Ok(())
    }

    /// Run `op` with the retry budget. A transient fault still standing when the budget runs out
    /// (or a failed reconnect) comes back as [`RemoteFault::RetriesExhausted`].
    fn call<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&dyn RemoteService) -> Result<T, RemoteFault>,
    ) -> Result<T, RemoteFault> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            let fault = match op(self.session.as_ref()) {
                Ok(v) => return Ok(v),
                Err(fault) => fault,
            };
            if !fault.is_transient() {
                return Err(fault);
            }
            if attempt >= attempts {
                return Err(RemoteFault::retries_exhausted(attempt, fault));
            }
            attempt += 1;
            if fault.needs_reconnect() {
                self.logger
                    .log_debug(&format!("{} - {what}: {fault}; reconnecting", self.label));
                if let Err(e) = self.reconnect() {
                    return Err(if e.is_transient() {
                        RemoteFault::retries_exhausted(attempt - 1, e)
                    } else {
                        e
                    });
                }
            } else {
                self.retry.backoff.apply(Some(&fault), self.logger.as_ref());
            }
        }
    }

    pub fn retrieve_multiple(&mut self, criterion: &Criterion) -> Result<RecordPage, RemoteFault> {
        self.call("retrieve", |s| s.retrieve_multiple(criterion))
    }

    /// Fetch every page of `criterion` (first page if no paging info is set) and concatenate.
    pub fn retrieve_all(&mut self, criterion: &Criterion) -> Result<Vec<Record>, RemoteFault> {
        let mut query = criterion.clone();
        let mut page = query
            .page
            .take()
            .unwrap_or_else(|| PageInfo::first(Defaults::PAGE_SIZE));
        page.page_number = 1;
        page.paging_cookie = None;
        query.top_count = None;

        let mut records = Vec::new();
        loop {
            query.page = Some(page.clone());
            let result = self.retrieve_multiple(&query)?;
            if result.more_records && result.records.is_empty() {
                return Err(RemoteFault::Storage(format!(
                    "page {} of {} was empty but more records were reported",
                    page.page_number, query.kind
                )));
            }
            records.extend(result.records);
            if !result.more_records {
                return Ok(records);
            }
            page.paging_cookie = result.paging_cookie;
            page.page_number += 1;
        }
    }

    pub fn create(&mut self, record: &Record) -> Result<String, RemoteFault> {
        self.call("create", |s| s.create(record))
    }

    pub fn update(&mut self, record: &Record) -> Result<(), RemoteFault> {
        self.call("update", |s| s.update(record))
    }

    pub fn delete(&mut self, kind: &str, id: &str) -> Result<(), RemoteFault> {
        self.call("delete", |s| s.delete(kind, id))
    }

    pub fn execute(&mut self, request: &Request) -> Result<Response, RemoteFault> {
        self.call("execute", |s| s.execute(request))
    }

    pub fn who_am_i(&mut self) -> Result<String, RemoteFault> {
        self.call("who_am_i", |s| s.who_am_i())
    }
}
