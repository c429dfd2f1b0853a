use recsweep::connector::{FaultCodes, RetryStrategy, is_transient};
use recsweep::engine::stop::{RoundObservation, decide_after_round};
use recsweep::utils::JobSettings;
use recsweep::{
    AttributeValue, ConditionOperator, Criterion, JobRegistry, LogLevel, Record, RemoteFault,
    StopReason,
};
use std::fs;
use std::time::Duration;

// --- fault classification ---

#[test]
fn test_throttling_is_transient_through_context() {
    let err = anyhow::Error::new(RemoteFault::service(FaultCodes::TIME_LIMIT_EXCEEDED, "busy"))
        .context("update contact c1")
        .context("process record");
    assert!(is_transient(&err));
}

#[test]
fn test_business_faults_are_permanent() {
    let dup = anyhow::Error::new(RemoteFault::service(FaultCodes::DUPLICATE_RECORD, "exists"));
    assert!(!is_transient(&dup));
    assert!(!is_transient(&anyhow::anyhow!("plain failure")));
}

// --- selection ---

#[test]
fn test_not_equal_excludes_missing_values() {
    let c = Criterion::new("asyncoperation").with_condition(
        "statecode",
        ConditionOperator::NotEqual,
        Some(AttributeValue::OptionSet(3)),
    );
    let pending = Record::new("asyncoperation", "a").with("statecode", AttributeValue::OptionSet(0));
    let done = Record::new("asyncoperation", "b").with("statecode", AttributeValue::OptionSet(3));
    let unknown = Record::new("asyncoperation", "c");
    assert!(c.matches(&pending));
    assert!(!c.matches(&done));
    assert!(!c.matches(&unknown));
}

#[test]
fn test_criterion_row_limit_without_paging() {
    let records: Vec<Record> = (0..10)
        .map(|i| Record::new("task", format!("t{i}")).with("n", AttributeValue::Integer(i)))
        .collect();
    let mut c = Criterion::new("task").order_by("n", true);
    c.top_count = Some(3);
    let page = c.apply(records);
    let ids: Vec<&str> = page.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["t9", "t8", "t7"]);
    assert!(!page.more_records);
}

#[test]
fn test_record_json_lines_format() {
    let line = r#"{"id":"c1","kind":"contact","attributes":{"firstname":{"type":"text","value":" Ada"},"statecode":{"type":"option_set","value":0}}}"#;
    let record: Record = serde_json::from_str(line).unwrap();
    assert_eq!(record.get("firstname").and_then(AttributeValue::as_text), Some(" Ada"));
    assert_eq!(record.get("statecode"), Some(&AttributeValue::OptionSet(0)));
}

// --- stop rules ---

#[test]
fn test_stagnation_wins_over_other_rules() {
    let obs = RoundObservation {
        last_count: 3,
        count: 3,
        page_size: 5,
        elapsed: Duration::from_secs(10),
        max_duration: Duration::ZERO,
        attempted: 3,
        failed: 3,
        interrupted: true,
    };
    assert_eq!(decide_after_round(&obs), Some(StopReason::Stagnation));
    assert!(StopReason::Stagnation.completed());
    assert!(!StopReason::AllFailed.completed());
}

// --- settings ---

#[test]
fn test_settings_file_in_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("recsweep.toml"),
        r#"
[connection]
auth_mode = "password"
principal = "svc"

[process]
threads = 4
page_size = 500
log_level = "errors_only"

[retry]
retrieval_strategy = "fixed"
transient_retry_limit = 2

[jobs]
names = ["purge-plugin-traces", "TrimContactNames"]
"#,
    )
    .unwrap();

    let settings = JobSettings::load(dir.path(), None).unwrap();
    settings.validate().unwrap();
    assert_eq!(settings.threads, 4);
    assert_eq!(settings.log_level, LogLevel::ErrorsOnly);
    assert_eq!(settings.retrieval_strategy, RetryStrategy::Fixed);

    let options = settings.engine_options();
    assert_eq!(options.page_size, 500);
    assert_eq!(options.transient_retry_limit, 2);
    assert_eq!(options.retrieval_retry.strategy, RetryStrategy::Fixed);

    let jobs = JobRegistry::with_builtin().resolve_all(&settings.job_names).unwrap();
    let types: Vec<&str> = jobs.iter().map(|j| j.type_name()).collect();
    assert_eq!(types, vec!["PurgePluginTraces", "TrimContactNames"]);
}

#[test]
fn test_missing_settings_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = JobSettings::load(dir.path(), None).unwrap();
    assert_eq!(settings.threads, 10);
    assert_eq!(settings.page_size, 2500);
    assert!(settings.job_names.is_empty());
    assert!(JobSettings::load(dir.path(), Some(dir.path().join("absent.toml").as_path())).is_err());
}
