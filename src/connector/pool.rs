//! Connection pool: one main proxy for the process, one worker proxy per worker per round.

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::proxy::ProxyRetry;
use super::{AuthToken, BackoffPolicy, Connector, Proxy, RemoteFault, RemoteService, RetryPolicy, RetryStrategy};
use crate::error::SetupError;
use crate::logging::{JobLogger, Properties};
use crate::utils::config::Defaults;
use crate::utils::fd_limit::max_workers_by_fd_limit;

/// Process-wide transport settings, applied once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportTuning {
    pub max_connections: usize,
    pub keep_alive: bool,
    pub nagle: bool,
    pub io_timeout: Duration,
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            max_connections: Defaults::CONNECTION_LIMIT,
            keep_alive: true,
            nagle: false,
            io_timeout: Duration::from_secs(Defaults::IO_TIMEOUT_SECS),
        }
    }
}

static TRANSPORT_TUNING: OnceLock<TransportTuning> = OnceLock::new();

/// Install `requested` if nothing is installed yet; return what is in effect.
pub fn apply_transport_tuning(requested: TransportTuning) -> &'static TransportTuning {
    let applied = TRANSPORT_TUNING.get_or_init(|| requested);
    if *applied != requested {
        log::debug!("Transport tuning already applied for this process; keeping {applied:?}");
    }
    applied
}

#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Establishment retry for main and worker connections.
    pub connect_retry: RetryPolicy,
    pub proxy_retry: ProxyRetry,
    /// Caller id stamped on every proxy. Defaults to the main login's identity.
    pub caller_id: Option<String>,
    pub tuning: TransportTuning,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            connect_retry: RetryPolicy::new(
                Defaults::CONNECT_ATTEMPTS,
                Duration::from_millis(Defaults::CONNECT_STEP_MS),
                RetryStrategy::Linear,
            ),
            proxy_retry: ProxyRetry::default(),
            caller_id: None,
            tuning: TransportTuning::default(),
        }
    }
}

impl PoolOptions {
    /// No waiting anywhere: connect retries and throttling backoff are immediate.
    pub fn without_delays(mut self) -> Self {
        self.connect_retry.wait = Duration::ZERO;
        self.proxy_retry.backoff = BackoffPolicy::none();
        self
    }
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    shared_token: Arc<RwLock<AuthToken>>,
    main: Mutex<Proxy>,
    caller_id: String,
    options: PoolOptions,
    tuning: &'static TransportTuning,
    logger: Arc<dyn JobLogger>,
}

impl ConnectionPool {
    /// Establish the main connection with bounded retry. Running out of attempts is fatal.
    pub fn connect(
        connector: Arc<dyn Connector>,
        options: PoolOptions,
        logger: Arc<dyn JobLogger>,
    ) -> Result<Self, SetupError> {
        let tuning = apply_transport_tuning(options.tuning);
        connector.apply_tuning(tuning);

        let attempts = options.connect_retry.max_attempts.max(1);
        let (token, session) = options
            .connect_retry
            .run(
                |_| login(connector.as_ref()),
                |fault, attempt| log_connect_failure(logger.as_ref(), "main", fault, attempt, attempts),
            )
            .map_err(|source| SetupError::ConnectionFailed { attempts, source })?;

        let caller_id = options
            .caller_id
            .clone()
            .unwrap_or_else(|| token.caller_id.clone());
        let shared_token = Arc::new(RwLock::new(token));
        let mut main = Proxy::new(
            session,
            Arc::clone(&connector),
            Arc::clone(&shared_token),
            options.proxy_retry,
            Arc::clone(&logger),
            "main".into(),
        );
        main.set_caller_id(caller_id.clone());
        logger.log_debug(&format!(
            "Main connection established ({} as {caller_id})",
            main.info().endpoint_url
        ));

        Ok(Self {
            connector,
            shared_token,
            main: Mutex::new(main),
            caller_id,
            options,
            tuning,
            logger,
        })
    }

    /// The process-lifetime main proxy (used for retrieval and pre/post operations).
    pub fn main_proxy(&self) -> MutexGuard<'_, Proxy> {
        self.main.lock()
    }

    /// Fresh proxy for one worker. Clone-capable auth reuses the shared token; password auth
    /// logs in again. Same bounded retry as the main connection.
    pub fn worker_proxy(&self, worker: usize) -> Result<Proxy, RemoteFault> {
        let attempts = self.options.connect_retry.max_attempts.max(1);
        let label = format!("worker-{worker}");
        let (_, session) = self.options.connect_retry.run(
            |_| {
                if self.connector.auth_mode().supports_clone() {
                    self.clone_session(&label)
                } else {
                    login(self.connector.as_ref())
                }
            },
            |fault, attempt| log_connect_failure(self.logger.as_ref(), &label, fault, attempt, attempts),
        )?;
        let mut proxy = Proxy::new(
            session,
            Arc::clone(&self.connector),
            Arc::clone(&self.shared_token),
            self.options.proxy_retry,
            Arc::clone(&self.logger),
            label,
        );
        proxy.set_caller_id(self.caller_id.clone());
        Ok(proxy)
    }

    /// Open a session from the shared token. A stale token is replaced by a fresh login first,
    /// so later workers clone from the new one.
    fn clone_session(&self, label: &str) -> Result<(AuthToken, Box<dyn RemoteService>), RemoteFault> {
        let token = self.shared_token.read().clone();
        match self.connector.open(&token) {
            Ok(session) => Ok((token, session)),
            Err(fault) if fault.needs_reconnect() => {
                self.logger
                    .log_debug(&format!("{label}: {fault}; refreshing the shared token"));
                let (token, session) = login(self.connector.as_ref())?;
                *self.shared_token.write() = token.clone();
                Ok((token, session))
            }
            Err(fault) => Err(fault),
        }
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn tuning(&self) -> &TransportTuning {
        self.tuning
    }

    /// Most workers a round may use: transport connection limit, capped by the FD limit.
    pub fn max_workers(&self) -> usize {
        let cap = self.tuning.max_connections.max(1);
        match max_workers_by_fd_limit() {
            Some(fd_cap) => cap.min(fd_cap),
            None => cap,
        }
    }

    pub fn logger(&self) -> &Arc<dyn JobLogger> {
        &self.logger
    }
}

fn login(connector: &dyn Connector) -> Result<(AuthToken, Box<dyn RemoteService>), RemoteFault> {
    let token = connector.authenticate()?;
    let session = connector.open(&token)?;
    Ok((token, session))
}

fn log_connect_failure(logger: &dyn JobLogger, who: &str, fault: &RemoteFault, attempt: u32, attempts: u32) {
    let mut props: Properties = fault.details();
    props.insert("Connection".into(), who.to_string());
    props.insert("Try count".into(), format!("{attempt}/{attempts}"));
    logger.log_exception(&anyhow::Error::new(fault.clone()), &props, None);
}
