//! Remote data service seam: the [`Connector`]/[`RemoteService`] traits, fault classification,
//! backoff, per-worker proxies and the connection pool.

pub mod backoff;
pub mod fault;
pub mod pool;
pub mod proxy;
pub mod sqlite;

pub use backoff::{BackoffPolicy, RetryPolicy, RetryStrategy};
pub use fault::{FaultCodes, RemoteFault, as_remote_fault, is_transient};
pub use pool::{ConnectionPool, PoolOptions, TransportTuning};
pub use proxy::{Proxy, ProxyRetry};
pub use sqlite::SqliteConnector;

use serde::Deserialize;
use std::fmt;
use std::time::Instant;

use crate::types::{Criterion, Record, RecordPage, Request, Response};

/// Authentication scheme of a connector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    OAuth,
    ClientSecret,
    Certificate,
    Password,
}

impl AuthMode {
    /// Token-based modes can open extra sessions from an existing token.
    /// Password sessions must log in again.
    pub fn supports_clone(self) -> bool {
        !matches!(self, AuthMode::Password)
    }

    /// Whether a secret must be supplied to authenticate.
    pub fn needs_secret(self) -> bool {
        matches!(self, AuthMode::Password | AuthMode::ClientSecret)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthMode::OAuth => "OAuth",
            AuthMode::ClientSecret => "ClientSecret",
            AuthMode::Certificate => "Certificate",
            AuthMode::Password => "Password",
        };
        f.write_str(s)
    }
}

/// Result of a successful login.
#[derive(Clone, Debug)]
pub struct AuthToken {
    pub value: String,
    /// Identity the service assigned to this login.
    pub caller_id: String,
    pub issued_at: Instant,
}

/// Descriptive data of an open session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub endpoint_url: String,
    pub display_name: String,
}

/// One authenticated session against the record store. Not shared between threads.
pub trait RemoteService: Send {
    fn retrieve_multiple(&self, criterion: &Criterion) -> Result<RecordPage, RemoteFault>;
    /// Returns the id of the created record.
    fn create(&self, record: &Record) -> Result<String, RemoteFault>;
    /// Merges the given attributes into the stored record.
    fn update(&self, record: &Record) -> Result<(), RemoteFault>;
    fn delete(&self, kind: &str, id: &str) -> Result<(), RemoteFault>;
    fn execute(&self, request: &Request) -> Result<Response, RemoteFault>;
    fn who_am_i(&self) -> Result<String, RemoteFault>;
    fn info(&self) -> SessionInfo;
}

/// Factory for sessions: logs in and opens sessions from a token.
pub trait Connector: Send + Sync {
    fn auth_mode(&self) -> AuthMode;
    fn authenticate(&self) -> Result<AuthToken, RemoteFault>;
    fn open(&self, token: &AuthToken) -> Result<Box<dyn RemoteService>, RemoteFault>;
    /// Called once per process before the first login.
    fn apply_tuning(&self, _tuning: &TransportTuning) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_support_by_auth_mode() {
        assert!(AuthMode::OAuth.supports_clone());
        assert!(AuthMode::ClientSecret.supports_clone());
        assert!(AuthMode::Certificate.supports_clone());
        assert!(!AuthMode::Password.supports_clone());
    }
}
