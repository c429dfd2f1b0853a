//! Public and internal types for the recsweep API: records, selection criteria, pages, run summaries.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::stop::StopReason;

/// Named attributes of a record, ordered by name.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Reference to another record (kind + id).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: String,
    pub id: String,
}

/// Typed attribute value. Serialized as `{"type": "...", "value": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Reference(RecordRef),
    OptionSet(i32),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl AttributeValue {
    pub fn text(s: impl Into<String>) -> Self {
        AttributeValue::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values of compatible types. Integers and floats compare numerically;
    /// option sets compare by value. Returns `None` for incompatible types or nulls.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        use AttributeValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (OptionSet(a), OptionSet(b)) => Some(a.cmp(b)),
            (OptionSet(a), Integer(b)) => Some(i64::from(*a).cmp(b)),
            (Integer(a), OptionSet(b)) => Some(a.cmp(&i64::from(*b))),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Reference(a), Reference(b)) if a.kind == b.kind => Some(a.id.cmp(&b.id)),
            _ => None,
        }
    }

    /// Human-readable rendering used for metrics and log properties.
    pub fn display_value(&self) -> String {
        match self {
            AttributeValue::Null => String::new(),
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Integer(i) => i.to_string(),
            AttributeValue::Float(f) => f.to_string(),
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Reference(r) => format!("{}:{}", r.kind, r.id),
            AttributeValue::OptionSet(v) => v.to_string(),
            AttributeValue::Timestamp(ms) => chrono::DateTime::from_timestamp_millis(*ms)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| ms.to_string()),
        }
    }
}

/// One addressable unit of remote data: stable id, kind tag, typed attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl Record {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attributes: AttributeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(name.into(), value);
    }

    /// Attribute value, or `None` when the attribute is absent.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    fn value_or_null(&self, name: &str) -> &AttributeValue {
        static NULL: AttributeValue = AttributeValue::Null;
        self.attributes.get(name).unwrap_or(&NULL)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equal,
    NotEqual,
    Null,
    NotNull,
    GreaterThan,
    LessThan,
    BeginsWith,
}

/// Single filter condition on a named attribute. Absent attributes are treated as null.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<AttributeValue>,
}

impl Condition {
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.value_or_null(&self.attribute);
        let expected = self.value.as_ref();
        match self.operator {
            ConditionOperator::Null => actual.is_null(),
            ConditionOperator::NotNull => !actual.is_null(),
            ConditionOperator::Equal => {
                expected.is_some_and(|v| actual.compare(v) == Some(Ordering::Equal))
            }
            ConditionOperator::NotEqual => {
                !actual.is_null()
                    && expected.is_some_and(|v| actual.compare(v) != Some(Ordering::Equal))
            }
            ConditionOperator::GreaterThan => {
                expected.is_some_and(|v| actual.compare(v) == Some(Ordering::Greater))
            }
            ConditionOperator::LessThan => {
                expected.is_some_and(|v| actual.compare(v) == Some(Ordering::Less))
            }
            ConditionOperator::BeginsWith => match (actual.as_text(), expected) {
                (Some(a), Some(AttributeValue::Text(prefix))) => a.starts_with(prefix.as_str()),
                _ => false,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub attribute: String,
    pub descending: bool,
}

/// Which attributes a retrieval returns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSet {
    #[default]
    All,
    Columns(Vec<String>),
}

/// Cursor-based paging state carried between retrievals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Records per page.
    pub count: usize,
    /// 1-based page number.
    pub page_number: usize,
    /// Opaque cursor returned by the service for the previous page.
    pub paging_cookie: Option<String>,
}

impl PageInfo {
    pub fn first(count: usize) -> Self {
        Self {
            count,
            page_number: 1,
            paging_cookie: None,
        }
    }
}

/// Opaque query object produced by a job: filter, ordering, columns, paging/row limit, no-lock hint.
/// The engine only touches `page`, `top_count` and `no_lock`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub kind: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub columns: ColumnSet,
    #[serde(default)]
    pub page: Option<PageInfo>,
    #[serde(default)]
    pub top_count: Option<usize>,
    #[serde(default)]
    pub no_lock: bool,
}

impl Criterion {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            conditions: Vec::new(),
            orders: Vec::new(),
            columns: ColumnSet::All,
            page: None,
            top_count: None,
            no_lock: false,
        }
    }

    pub fn with_condition(
        mut self,
        attribute: impl Into<String>,
        operator: ConditionOperator,
        value: Option<AttributeValue>,
    ) -> Self {
        self.conditions.push(Condition {
            attribute: attribute.into(),
            operator,
            value,
        });
        self
    }

    pub fn order_by(mut self, attribute: impl Into<String>, descending: bool) -> Self {
        self.orders.push(Order {
            attribute: attribute.into(),
            descending,
        });
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = ColumnSet::Columns(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// True if the record has this criterion's kind and satisfies every condition.
    pub fn matches(&self, record: &Record) -> bool {
        record.kind == self.kind && self.conditions.iter().all(|c| c.matches(record))
    }

    /// Stable sort by the criterion's orders; ties keep service order.
    pub fn sort(&self, records: &mut [Record]) {
        if self.orders.is_empty() {
            return;
        }
        records.sort_by(|a, b| {
            for order in &self.orders {
                let ord = a
                    .value_or_null(&order.attribute)
                    .compare(b.value_or_null(&order.attribute))
                    .unwrap_or(Ordering::Equal);
                let ord = if order.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    fn project(&self, mut record: Record) -> Record {
        if let ColumnSet::Columns(cols) = &self.columns {
            record.attributes.retain(|k, _| cols.iter().any(|c| c == k));
        }
        record
    }

    /// Evaluate this criterion over an in-service candidate set (in service order): filter, sort,
    /// then page (cookie = offset of the next record) or apply the row limit, then project columns.
    /// Used by record stores that filter in process.
    pub fn apply(&self, candidates: Vec<Record>) -> RecordPage {
        let mut matched: Vec<Record> = candidates.into_iter().filter(|r| self.matches(r)).collect();
        self.sort(&mut matched);
        let total = matched.len();

        let (records, more_records, paging_cookie) = match &self.page {
            Some(page) => {
                let count = page.count.max(1);
                let offset = page
                    .paging_cookie
                    .as_deref()
                    .and_then(|c| c.parse::<usize>().ok())
                    .unwrap_or_else(|| page.page_number.saturating_sub(1) * count);
                let slice: Vec<Record> = matched.into_iter().skip(offset).take(count).collect();
                let next = offset + slice.len();
                (slice, next < total, Some(next.to_string()))
            }
            None => {
                let limit = self.top_count.unwrap_or(total);
                (matched.into_iter().take(limit).collect(), false, None)
            }
        };

        RecordPage {
            records: records.into_iter().map(|r| self.project(r)).collect(),
            more_records,
            paging_cookie,
        }
    }
}

/// One retrieval result: records in the order the service returned them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub more_records: bool,
    pub paging_cookie: Option<String>,
}

/// Custom request for [`RemoteService::execute`](crate::connector::RemoteService::execute).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Request {
    pub name: String,
    pub parameters: AttributeMap,
}

impl Request {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: AttributeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    pub name: String,
    pub results: AttributeMap,
}

/// Aggregate result of one job run. `completed` is the boolean run outcome.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub rounds: usize,
    pub retrieved: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub transient_retries: usize,
    pub elapsed: Duration,
    pub stop_reason: Option<StopReason>,
    pub completed: bool,
}

impl RunSummary {
    /// Records per second over the whole run.
    pub fn speed(&self) -> f64 {
        records_per_second(self.attempted + self.skipped, self.elapsed)
    }

    pub(crate) fn finish(mut self, reason: StopReason, elapsed: Duration) -> Self {
        self.stop_reason = Some(reason);
        self.completed = reason.completed();
        self.elapsed = elapsed;
        self
    }
}

/// Throughput in records/second rounded to 2 decimals (0 when nothing elapsed).
pub fn records_per_second(count: usize, elapsed: Duration) -> f64 {
    let ms = elapsed.as_secs_f64() * 1000.0;
    if ms <= 0.0 {
        return 0.0;
    }
    ((count as f64 / ms * 1000.0) * 100.0).round() / 100.0
}
