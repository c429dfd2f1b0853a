//! SQLite-backed record store: a local [`Connector`] so the binary runs without a remote service.
//! Records keep their attributes as JSON; filtering, ordering and paging run in process.

use anyhow::{Context, Result};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{
    AuthMode, AuthToken, Connector, FaultCodes, RemoteFault, RemoteService, SessionInfo,
    TransportTuning,
};
use crate::types::{
    AttributeMap, AttributeValue, Criterion, Record, RecordPage, Request, Response,
};

/// WAL tuning pragmas. Use after PRAGMA journal_mode = WAL.
const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    attributes TEXT NOT NULL,
    UNIQUE (kind, id)
);
CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);

CREATE TABLE IF NOT EXISTS principals (
    name TEXT PRIMARY KEY,
    secret TEXT NOT NULL,
    caller_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    caller_id TEXT NOT NULL,
    issued_at INTEGER NOT NULL
);
"#;

const INSERT_RECORD_SQL: &str =
    "INSERT INTO records (kind, id, attributes) VALUES (?1, ?2, ?3)";

/// Open or create a store file with WAL and schema applied (idempotent).
pub fn open_store(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).context("open record store")?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .context("enable WAL")?;
    conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
    conn.execute_batch(SCHEMA).context("create schema")?;
    Ok(conn)
}

/// Insert records in one transaction. Empty ids get a fresh UUID. Returns how many were inserted.
pub fn insert_records(conn: &mut Connection, records: &[Record]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(INSERT_RECORD_SQL)?;
        for r in records {
            let id = if r.id.is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                r.id.clone()
            };
            let json = serde_json::to_string(&r.attributes)?;
            stmt.execute(params![r.kind, id, json])
                .with_context(|| format!("insert {} {}", r.kind, id))?;
        }
    }
    tx.commit()?;
    Ok(records.len())
}

/// Register a login principal.
pub fn add_principal(conn: &Connection, name: &str, secret: &str, caller_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO principals (name, secret, caller_id) VALUES (?1, ?2, ?3)",
        params![name, secret, caller_id],
    )?;
    Ok(())
}

/// Invalidate every issued token; open sessions see `TokenExpired` on their next call.
pub fn revoke_sessions(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM sessions", [])?)
}

/// Count stored records, optionally of one kind.
pub fn count_records(conn: &Connection, kind: Option<&str>) -> Result<usize> {
    let n: i64 = match kind {
        Some(k) => conn.query_row("SELECT COUNT(*) FROM records WHERE kind = ?1", [k], |r| r.get(0))?,
        None => conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?,
    };
    Ok(n.max(0) as usize)
}

fn storage_fault(e: rusqlite::Error) -> RemoteFault {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            RemoteFault::service(FaultCodes::CONCURRENCY_LIMIT_EXCEEDED, e.to_string())
        }
        Some(ErrorCode::ConstraintViolation) => {
            RemoteFault::service(FaultCodes::DUPLICATE_RECORD, e.to_string())
        }
        _ => RemoteFault::Storage(e.to_string()),
    }
}

fn decode_attributes(json: &str) -> Result<AttributeMap, RemoteFault> {
    serde_json::from_str(json).map_err(|e| RemoteFault::Storage(format!("bad attributes: {e}")))
}

fn encode_attributes(attributes: &AttributeMap) -> Result<String, RemoteFault> {
    serde_json::to_string(attributes).map_err(|e| RemoteFault::Storage(e.to_string()))
}

/// [`Connector`] for a local store file. `principal` enables login against the principals table;
/// without it every login is anonymous (nil caller id).
pub struct SqliteConnector {
    path: PathBuf,
    auth_mode: AuthMode,
    principal: Option<String>,
    secret: Option<String>,
    busy_timeout_ms: AtomicU64,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>, auth_mode: AuthMode) -> Self {
        Self {
            path: path.into(),
            auth_mode,
            principal: None,
            secret: None,
            busy_timeout_ms: AtomicU64::new(5_000),
        }
    }

    pub fn with_credentials(mut self, principal: Option<String>, secret: Option<String>) -> Self {
        self.principal = principal;
        self.secret = secret;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, RemoteFault> {
        let conn = open_store(&self.path).map_err(|e| RemoteFault::Connection(format!("{e:#}")))?;
        conn.busy_timeout(Duration::from_millis(self.busy_timeout_ms.load(Ordering::Relaxed)))
            .map_err(storage_fault)?;
        Ok(conn)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            endpoint_url: format!("sqlite://{}", self.path.display()),
            display_name: self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl Connector for SqliteConnector {
    fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    fn apply_tuning(&self, tuning: &TransportTuning) {
        self.busy_timeout_ms
            .store(tuning.io_timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn authenticate(&self) -> Result<AuthToken, RemoteFault> {
        let conn = self.connect()?;
        let caller_id = match &self.principal {
            None => uuid::Uuid::nil().to_string(),
            Some(name) => {
                let row: Option<(String, String)> = conn
                    .query_row(
                        "SELECT secret, caller_id FROM principals WHERE name = ?1",
                        [name],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()
                    .map_err(storage_fault)?;
                let Some((secret, caller_id)) = row else {
                    return Err(RemoteFault::LoginDenied(format!("unknown principal {name}")));
                };
                if self.auth_mode.needs_secret() && self.secret.as_deref() != Some(secret.as_str()) {
                    return Err(RemoteFault::LoginDenied(format!("invalid secret for {name}")));
                }
                caller_id
            }
        };
        let token = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO sessions (token, caller_id, issued_at) VALUES (?1, ?2, ?3)",
            params![token, caller_id, chrono::Utc::now().timestamp()],
        )
        .map_err(storage_fault)?;
        Ok(AuthToken {
            value: token,
            caller_id,
            issued_at: Instant::now(),
        })
    }

    fn open(&self, token: &AuthToken) -> Result<Box<dyn RemoteService>, RemoteFault> {
        let session = SqliteSession {
            conn: self.connect()?,
            token: token.value.clone(),
            caller_id: token.caller_id.clone(),
            info: self.info(),
        };
        session.ensure_token()?;
        Ok(Box::new(session))
    }
}

struct SqliteSession {
    conn: Connection,
    token: String,
    caller_id: String,
    info: SessionInfo,
}

impl SqliteSession {
    fn ensure_token(&self) -> Result<(), RemoteFault> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM sessions WHERE token = ?1", [&self.token], |r| r.get(0))
            .optional()
            .map_err(storage_fault)?;
        match found {
            Some(_) => Ok(()),
            None => Err(RemoteFault::TokenExpired(format!("token {} is no longer valid", self.token))),
        }
    }

    fn load_kind(&self, kind: &str) -> Result<Vec<Record>, RemoteFault> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, attributes FROM records WHERE kind = ?1 ORDER BY seq")
            .map_err(storage_fault)?;
        let rows = stmt
            .query_map([kind], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(storage_fault)?;
        let mut records = Vec::new();
        for row in rows {
            let (id, json) = row.map_err(storage_fault)?;
            records.push(Record {
                id,
                kind: kind.to_string(),
                attributes: decode_attributes(&json)?,
            });
        }
        Ok(records)
    }
}

impl RemoteService for SqliteSession {
    fn retrieve_multiple(&self, criterion: &Criterion) -> Result<RecordPage, RemoteFault> {
        self.ensure_token()?;
        Ok(criterion.apply(self.load_kind(&criterion.kind)?))
    }

    fn create(&self, record: &Record) -> Result<String, RemoteFault> {
        self.ensure_token()?;
        let id = if record.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            record.id.clone()
        };
        self.conn
            .execute(
                INSERT_RECORD_SQL,
                params![record.kind, id, encode_attributes(&record.attributes)?],
            )
            .map_err(storage_fault)?;
        Ok(id)
    }

    fn update(&self, record: &Record) -> Result<(), RemoteFault> {
        self.ensure_token()?;
        let current: Option<String> = self
            .conn
            .query_row(
                "SELECT attributes FROM records WHERE kind = ?1 AND id = ?2",
                params![record.kind, record.id],
                |r| r.get(0),
            )
            .optional()
            .map_err(storage_fault)?;
        let Some(json) = current else {
            return Err(RemoteFault::NotFound {
                kind: record.kind.clone(),
                id: record.id.clone(),
            });
        };
        let mut attributes = decode_attributes(&json)?;
        attributes.extend(record.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.conn
            .execute(
                "UPDATE records SET attributes = ?3 WHERE kind = ?1 AND id = ?2",
                params![record.kind, record.id, encode_attributes(&attributes)?],
            )
            .map_err(storage_fault)?;
        Ok(())
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), RemoteFault> {
        self.ensure_token()?;
        let n = self
            .conn
            .execute("DELETE FROM records WHERE kind = ?1 AND id = ?2", params![kind, id])
            .map_err(storage_fault)?;
        if n == 0 {
            return Err(RemoteFault::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn execute(&self, request: &Request) -> Result<Response, RemoteFault> {
        self.ensure_token()?;
        let mut response = Response {
            name: request.name.clone(),
            results: AttributeMap::new(),
        };
        match request.name.as_str() {
            "WhoAmI" => {
                response
                    .results
                    .insert("UserId".into(), AttributeValue::text(self.caller_id.clone()));
            }
            "RetrieveCount" => {
                let kind = request
                    .parameters
                    .get("kind")
                    .and_then(AttributeValue::as_text)
                    .ok_or_else(|| {
                        RemoteFault::service(FaultCodes::UNSUPPORTED_REQUEST, "RetrieveCount needs a `kind` text parameter")
                    })?;
                let n: i64 = self
                    .conn
                    .query_row("SELECT COUNT(*) FROM records WHERE kind = ?1", [kind], |r| r.get(0))
                    .map_err(storage_fault)?;
                response.results.insert("Count".into(), AttributeValue::Integer(n));
            }
            other => {
                return Err(RemoteFault::service(
                    FaultCodes::UNSUPPORTED_REQUEST,
                    format!("request {other} is not supported"),
                ));
            }
        }
        Ok(response)
    }

    fn who_am_i(&self) -> Result<String, RemoteFault> {
        self.ensure_token()?;
        Ok(self.caller_id.clone())
    }

    fn info(&self) -> SessionInfo {
        self.info.clone()
    }
}
