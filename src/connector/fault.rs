//! Remote-service faults and their transient/reconnect classification.

use thiserror::Error;

use crate::logging::Properties;

/// Service error codes the remote store reports for throttling.
pub struct FaultCodes;

impl FaultCodes {
    /// Number of requests exceeded the limit of 6000 over time window of 300 seconds.
    pub const RATE_LIMIT_EXCEEDED: i32 = -2147015902;
    /// Combined execution time of incoming requests exceeded limit of 1,200,000 milliseconds over time window of 300 seconds.
    pub const TIME_LIMIT_EXCEEDED: i32 = -2147015903;
    /// Number of concurrent requests exceeded the limit of 52.
    pub const CONCURRENCY_LIMIT_EXCEEDED: i32 = -2147015898;
    /// Record already exists.
    pub const DUPLICATE_RECORD: i32 = -2147220937;
    /// Request name is not supported by this service.
    pub const UNSUPPORTED_REQUEST: i32 = -2147220715;

    pub const TRANSIENT: [i32; 3] = [
        Self::RATE_LIMIT_EXCEEDED,
        Self::TIME_LIMIT_EXCEEDED,
        Self::CONCURRENCY_LIMIT_EXCEEDED,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RemoteFault {
    #[error("service fault {code}: {message}")]
    Service { code: i32, message: String },

    #[error("security token expired: {0}")]
    TokenExpired(String),

    #[error("login denied: {0}")]
    LoginDenied(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{kind} with id {id} does not exist")]
    NotFound { kind: String, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    /// A proxy used its whole retry budget on a transient fault. Not retried again.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<RemoteFault>,
    },
}

impl RemoteFault {
    pub fn service(code: i32, message: impl Into<String>) -> Self {
        RemoteFault::Service {
            code,
            message: message.into(),
        }
    }

    pub fn rate_limited() -> Self {
        Self::service(FaultCodes::RATE_LIMIT_EXCEEDED, "rate limit exceeded")
    }

    pub fn retries_exhausted(attempts: u32, last: RemoteFault) -> Self {
        RemoteFault::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Service code of this fault, or of the last fault behind an exhausted retry budget.
    pub fn code(&self) -> Option<i32> {
        match self {
            RemoteFault::Service { code, .. } => Some(*code),
            RemoteFault::RetriesExhausted { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Expired token or denied login: the session must be re-established before retrying.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, RemoteFault::TokenExpired(_) | RemoteFault::LoginDenied(_))
    }

    /// Throttling codes plus the reconnect family. Everything else is permanent, including a
    /// transient fault that already used up a proxy's retry budget.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteFault::Service { code, .. } => FaultCodes::TRANSIENT.contains(code),
            RemoteFault::RetriesExhausted { .. } => false,
            other => other.needs_reconnect(),
        }
    }

    /// Structured context for failure logs.
    pub fn details(&self) -> Properties {
        let mut props = Properties::new();
        if let Some(code) = self.code() {
            props.insert("Fault.Code".into(), code.to_string());
        }
        props.insert("Fault.Message".into(), self.to_string());
        props.insert("Fault.Transient".into(), self.is_transient().to_string());
        props
    }
}

/// First [`RemoteFault`] in the error's chain, if any.
pub fn as_remote_fault(err: &anyhow::Error) -> Option<&RemoteFault> {
    err.chain().find_map(|e| e.downcast_ref::<RemoteFault>())
}

/// True if the error chain carries a transient [`RemoteFault`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    as_remote_fault(err).is_some_and(RemoteFault::is_transient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_throttling_codes_are_transient() {
        for code in FaultCodes::TRANSIENT {
            assert!(RemoteFault::service(code, "x").is_transient());
        }
        assert!(!RemoteFault::service(FaultCodes::DUPLICATE_RECORD, "x").is_transient());
    }

    #[test]
    fn test_auth_faults_reconnect() {
        let expired = RemoteFault::TokenExpired("t".into());
        assert!(expired.needs_reconnect());
        assert!(expired.is_transient());
        assert!(!RemoteFault::Connection("down".into()).needs_reconnect());
        assert!(!RemoteFault::Connection("down".into()).is_transient());
    }

    #[test]
    fn test_classification_through_context() {
        let err = Err::<(), _>(RemoteFault::rate_limited())
            .context("delete record")
            .unwrap_err();
        assert!(is_transient(&err));
        assert_eq!(
            as_remote_fault(&err).and_then(RemoteFault::code),
            Some(FaultCodes::RATE_LIMIT_EXCEEDED)
        );
        assert!(!is_transient(&anyhow::anyhow!("plain")));
    }

    #[test]
    fn test_exhausted_budget_is_permanent() {
        let fault = RemoteFault::retries_exhausted(3, RemoteFault::rate_limited());
        assert!(!fault.is_transient());
        assert!(!fault.needs_reconnect());
        assert_eq!(fault.code(), Some(FaultCodes::RATE_LIMIT_EXCEEDED));
        assert_eq!(fault.details()["Fault.Transient"], "false");
        let err = anyhow::Error::new(fault).context("update contact c1");
        assert!(!is_transient(&err));
    }
}
