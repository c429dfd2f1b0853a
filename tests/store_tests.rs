//! End-to-end runs of the built-in jobs against a SQLite store file.

mod common;

use common::RecordingLogger;
use recsweep::connector::sqlite::{add_principal, count_records, insert_records, open_store, revoke_sessions};
use recsweep::jobs::builtin::{
    CancelAsyncOperations, DeactivateContactsFromFile, PurgePluginTraces, TrimContactNames,
};
use recsweep::{
    AttributeValue, AuthMode, ConnectionPool, Connector, Criterion, EngineOptions, JobLogger,
    PoolOptions, Record, RemoteFault, RemoteService, SetupError, SqliteConnector, StopReason, run_job,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn store_with(records: &[Record]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut conn = open_store(&path).unwrap();
    insert_records(&mut conn, records).unwrap();
    (dir, path)
}

fn pool_for(connector: SqliteConnector, logger: &Arc<RecordingLogger>) -> Result<ConnectionPool, SetupError> {
    ConnectionPool::connect(
        Arc::new(connector),
        PoolOptions::default().without_delays(),
        Arc::clone(logger) as Arc<dyn JobLogger>,
    )
}

fn engine_options(dir: &Path, page_size: usize) -> EngineOptions {
    EngineOptions {
        threads: 3,
        page_size,
        checkpoint_dir: dir.to_path_buf(),
        checkpoint_lock_timeout: Duration::from_secs(1),
        ..EngineOptions::default()
    }
    .without_delays()
}

fn fetch(path: &Path, id: &str, kind: &str) -> Record {
    let connector = SqliteConnector::new(path, AuthMode::OAuth);
    let session = connector.open(&connector.authenticate().unwrap()).unwrap();
    let page = session.retrieve_multiple(&Criterion::new(kind)).unwrap();
    page.records.into_iter().find(|r| r.id == id).unwrap()
}

#[test]
fn test_purge_plugin_traces_drains_store() {
    let traces: Vec<Record> = (0..7)
        .map(|i| Record::new(PurgePluginTraces::KIND, format!("trace-{i}")))
        .chain([Record::new("contact", "keep-me")])
        .collect();
    let (dir, path) = store_with(&traces);
    let logger = Arc::new(RecordingLogger::default());
    let pool = pool_for(SqliteConnector::new(&path, AuthMode::OAuth), &logger).unwrap();

    let summary = run_job(
        &pool,
        &PurgePluginTraces,
        engine_options(dir.path(), 3),
        Arc::clone(&logger) as Arc<dyn JobLogger>,
    )
    .unwrap();

    assert_eq!(summary.rounds, 4);
    assert_eq!(summary.succeeded, 7);
    assert_eq!(summary.stop_reason, Some(StopReason::Drained));
    let conn = open_store(&path).unwrap();
    assert_eq!(count_records(&conn, Some(PurgePluginTraces::KIND)).unwrap(), 0);
    assert_eq!(count_records(&conn, None).unwrap(), 1);
}

#[test]
fn test_cancel_async_operations_leaves_completed_and_recurring() {
    let op = |id: &str, state: i32, created: i64| {
        Record::new(CancelAsyncOperations::KIND, id)
            .with("statecode", AttributeValue::OptionSet(state))
            .with("createdon", AttributeValue::Timestamp(created))
            .with("name", AttributeValue::text(id))
    };
    let ops = vec![
        op("pending-old", 0, 1_000),
        op("pending-new", 1, 2_000),
        op("done", 3, 3_000),
        op("recurring", 0, 4_000).with("recurrencepattern", AttributeValue::text("FREQ=DAILY")),
    ];
    let (dir, path) = store_with(&ops);
    let logger = Arc::new(RecordingLogger::default());
    let pool = pool_for(SqliteConnector::new(&path, AuthMode::OAuth), &logger).unwrap();

    let summary = run_job(
        &pool,
        &CancelAsyncOperations,
        engine_options(dir.path(), 10),
        Arc::clone(&logger) as Arc<dyn JobLogger>,
    )
    .unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.stop_reason, Some(StopReason::Drained));
    for id in ["pending-old", "pending-new"] {
        let rec = fetch(&path, id, CancelAsyncOperations::KIND);
        assert_eq!(rec.get("statecode"), Some(&AttributeValue::OptionSet(3)));
        assert_eq!(rec.get("statuscode"), Some(&AttributeValue::OptionSet(32)));
    }
    let recurring = fetch(&path, "recurring", CancelAsyncOperations::KIND);
    assert_eq!(recurring.get("statecode"), Some(&AttributeValue::OptionSet(0)));
    assert_eq!(recurring.get("statuscode"), None);
}

#[test]
fn test_trim_contact_names_scan() {
    let contacts = vec![
        Record::new("contact", "c1")
            .with("firstname", AttributeValue::text("  Ada "))
            .with("fullname", AttributeValue::text("Ada Lovelace")),
        Record::new("contact", "c2").with("lastname", AttributeValue::text("Hopper")),
        Record::new("contact", "c3").with("fullname", AttributeValue::text("Alan Turing\t")),
    ];
    let (dir, path) = store_with(&contacts);
    let logger = Arc::new(RecordingLogger::default());
    let pool = pool_for(SqliteConnector::new(&path, AuthMode::OAuth), &logger).unwrap();

    let summary = run_job(
        &pool,
        &TrimContactNames,
        engine_options(dir.path(), 2),
        Arc::clone(&logger) as Arc<dyn JobLogger>,
    )
    .unwrap();

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.stop_reason, Some(StopReason::ScanCompleted));
    assert!(summary.completed);
    assert!(!dir.path().join("TrimContactNames.txt").exists());
    assert_eq!(
        fetch(&path, "c1", "contact").get("firstname"),
        Some(&AttributeValue::text("Ada"))
    );
    assert_eq!(
        fetch(&path, "c3", "contact").get("fullname"),
        Some(&AttributeValue::text("Alan Turing"))
    );
    assert_eq!(
        fetch(&path, "c2", "contact").get("lastname"),
        Some(&AttributeValue::text("Hopper"))
    );
}

#[test]
fn test_deactivate_contacts_from_file() {
    let contact = |id: &str, email: &str| {
        Record::new("contact", id)
            .with("emailaddress1", AttributeValue::text(email))
            .with("statecode", AttributeValue::OptionSet(0))
    };
    let contacts = vec![
        contact("c1", "ada@example.com"),
        contact("c2", "grace@example.com"),
        contact("c3", "twin@example.com"),
        contact("c4", "twin@example.com"),
    ];
    let (dir, path) = store_with(&contacts);
    let input = dir.path().join("leavers.csv");
    std::fs::write(
        &input,
        "email,reason\nada@example.com,left\nnobody@example.com,left\ntwin@example.com,left\n",
    )
    .unwrap();
    let logger = Arc::new(RecordingLogger::default());
    let pool = pool_for(SqliteConnector::new(&path, AuthMode::OAuth), &logger).unwrap();

    let mut options = engine_options(dir.path(), 10);
    options.input_file = Some(input);
    let summary = run_job(
        &pool,
        &DeactivateContactsFromFile,
        options,
        Arc::clone(&logger) as Arc<dyn JobLogger>,
    )
    .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
    assert!(summary.completed);
    let ada = fetch(&path, "c1", "contact");
    assert_eq!(ada.get("statecode"), Some(&AttributeValue::OptionSet(1)));
    assert_eq!(ada.get("statuscode"), Some(&AttributeValue::OptionSet(2)));
    assert_eq!(
        fetch(&path, "c3", "contact").get("statecode"),
        Some(&AttributeValue::OptionSet(0))
    );

    let pivot = std::fs::read_to_string(dir.path().join("DeactivateContactsFromFile_Pivot.txt")).unwrap();
    assert!(pivot.contains("ada@example.com,left,#PVT-TAG#,c1,OK,Success"));
    assert!(pivot.contains("no contact matches nobody@example.com"));
    assert!(pivot.contains("several contacts match twin@example.com"));
}

#[test]
fn test_password_login_checks_secret() {
    let (_dir, path) = store_with(&[]);
    add_principal(&open_store(&path).unwrap(), "svc", "s3cret", "caller-svc").unwrap();
    let logger = Arc::new(RecordingLogger::default());

    let denied = pool_for(
        SqliteConnector::new(&path, AuthMode::Password)
            .with_credentials(Some("svc".into()), Some("wrong".into())),
        &logger,
    );
    assert!(matches!(
        denied,
        Err(SetupError::ConnectionFailed {
            source: RemoteFault::LoginDenied(_),
            ..
        })
    ));

    let pool = pool_for(
        SqliteConnector::new(&path, AuthMode::Password)
            .with_credentials(Some("svc".into()), Some("s3cret".into())),
        &logger,
    )
    .unwrap();
    assert_eq!(pool.caller_id(), "caller-svc");
}

#[test]
fn test_revoked_sessions_reconnect() {
    let (_dir, path) = store_with(&[Record::new("contact", "c1")]);
    let logger = Arc::new(RecordingLogger::default());
    let pool = pool_for(SqliteConnector::new(&path, AuthMode::OAuth), &logger).unwrap();

    revoke_sessions(&open_store(&path).unwrap()).unwrap();

    let mut main = pool.main_proxy();
    let page = main.retrieve_multiple(&Criterion::new("contact")).unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(main.reconnects(), 1);
}
