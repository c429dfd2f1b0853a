//! Built-in maintenance jobs.

use anyhow::Context;

use super::{DataJob, ExecutionMode, JobFactory};
use crate::connector::Proxy;
use crate::pipeline::ExecutionContext;
use crate::types::{AttributeValue, ConditionOperator, Criterion, Record};

pub const BUILTIN_JOBS: &[(&str, JobFactory)] = &[
    ("purge-plugin-traces", purge_plugin_traces),
    ("cancel-async-operations", cancel_async_operations),
    ("trim-contact-names", trim_contact_names),
    ("deactivate-contacts-from-file", deactivate_contacts_from_file),
];

fn purge_plugin_traces() -> Box<dyn DataJob> {
    Box::new(PurgePluginTraces)
}

fn cancel_async_operations() -> Box<dyn DataJob> {
    Box::new(CancelAsyncOperations)
}

fn trim_contact_names() -> Box<dyn DataJob> {
    Box::new(TrimContactNames)
}

fn deactivate_contacts_from_file() -> Box<dyn DataJob> {
    Box::new(DeactivateContactsFromFile)
}

/// Deletes every plugin trace log row.
pub struct PurgePluginTraces;

impl PurgePluginTraces {
    pub const KIND: &'static str = "plugintracelog";
}

impl DataJob for PurgePluginTraces {
    fn name(&self) -> &str {
        "Purge plugin trace logs"
    }

    fn type_name(&self) -> &str {
        "PurgePluginTraces"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::IterativeDrain
    }

    fn selection_criterion(&self, _caller_id: &str) -> Criterion {
        Criterion::new(Self::KIND).select(&[])
    }

    fn process(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        let record = ctx.record();
        ctx.proxy()
            .delete(&record.kind, &record.id)
            .with_context(|| format!("delete {} {}", record.kind, record.id))?;
        Ok(())
    }
}

/// Cancels pending, non-recurring system jobs, newest first.
pub struct CancelAsyncOperations;

impl CancelAsyncOperations {
    pub const KIND: &'static str = "asyncoperation";
    pub const STATE_COMPLETED: i32 = 3;
    pub const STATUS_CANCELED: i32 = 32;
}

impl DataJob for CancelAsyncOperations {
    fn name(&self) -> &str {
        "Cancel pending async operations"
    }

    fn type_name(&self) -> &str {
        "CancelAsyncOperations"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::IterativeDrain
    }

    fn selection_criterion(&self, _caller_id: &str) -> Criterion {
        Criterion::new(Self::KIND)
            .select(&["statecode", "name"])
            .with_condition(
                "statecode",
                ConditionOperator::NotEqual,
                Some(AttributeValue::OptionSet(Self::STATE_COMPLETED)),
            )
            .with_condition("recurrencepattern", ConditionOperator::Null, None)
            .order_by("createdon", true)
    }

    fn process(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        let record = ctx.record();
        let update = Record::new(&record.kind, &record.id)
            .with("statecode", AttributeValue::OptionSet(Self::STATE_COMPLETED))
            .with("statuscode", AttributeValue::OptionSet(Self::STATUS_CANCELED));
        ctx.proxy()
            .update(&update)
            .with_context(|| format!("cancel {} {}", record.kind, record.id))?;
        Ok(())
    }
}

/// Strips leading/trailing whitespace from contact name fields.
pub struct TrimContactNames;

impl TrimContactNames {
    pub const KIND: &'static str = "contact";
    pub const FIELDS: [&'static str; 3] = ["firstname", "lastname", "fullname"];
}

impl DataJob for TrimContactNames {
    fn name(&self) -> &str {
        "Trim contact names"
    }

    fn type_name(&self) -> &str {
        "TrimContactNames"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::BoundedScan
    }

    fn selection_criterion(&self, _caller_id: &str) -> Criterion {
        Criterion::new(Self::KIND)
            .select(&Self::FIELDS)
            .order_by("fullname", false)
    }

    fn process(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        let record = ctx.record();
        let mut update = Record::new(&record.kind, &record.id);
        for field in Self::FIELDS {
            if let Some(AttributeValue::Text(value)) = record.get(field) {
                let trimmed = value.trim();
                if trimmed.len() != value.len() {
                    update.set(field, AttributeValue::text(trimmed));
                }
            }
        }
        if update.attributes.is_empty() {
            ctx.push_metric("Record.Unchanged", "true");
            return Ok(());
        }
        ctx.push_metric("Record.TrimmedFields", update.attributes.len().to_string());
        ctx.proxy()
            .update(&update)
            .with_context(|| format!("update {} {}", record.kind, record.id))?;
        Ok(())
    }
}

/// Deactivates the contacts listed by email address in an input file (first column).
pub struct DeactivateContactsFromFile;

impl DeactivateContactsFromFile {
    pub const KIND: &'static str = "contact";
    pub const EMAIL: &'static str = "emailaddress1";
    pub const STATE_INACTIVE: i32 = 1;
    pub const STATUS_INACTIVE: i32 = 2;

    fn lookup(email: &str) -> Criterion {
        let mut criterion = Criterion::new(Self::KIND)
            .select(&[Self::EMAIL, "statecode"])
            .with_condition(
                Self::EMAIL,
                ConditionOperator::Equal,
                Some(AttributeValue::text(email)),
            );
        criterion.top_count = Some(2);
        criterion
    }
}

impl DataJob for DeactivateContactsFromFile {
    fn name(&self) -> &str {
        "Deactivate contacts listed in a file"
    }

    fn type_name(&self) -> &str {
        "DeactivateContactsFromFile"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::InputFile
    }

    fn selection_criterion(&self, _caller_id: &str) -> Criterion {
        Criterion::new(Self::KIND).select(&[Self::EMAIL])
    }

    fn search_record(&self, proxy: &mut Proxy, fields: &[String]) -> anyhow::Result<Record> {
        let Some(email) = fields.first() else {
            anyhow::bail!("line has no email address");
        };
        let mut found = proxy
            .retrieve_multiple(&Self::lookup(email))
            .with_context(|| format!("look up contact {email}"))?
            .records;
        match found.len() {
            0 => anyhow::bail!("no contact matches {email}"),
            1 => Ok(found.remove(0)),
            _ => anyhow::bail!("several contacts match {email}"),
        }
    }

    fn process(&self, ctx: &mut ExecutionContext<'_>) -> anyhow::Result<()> {
        let record = ctx.record();
        if record.get("statecode") == Some(&AttributeValue::OptionSet(Self::STATE_INACTIVE)) {
            ctx.push_metric("Record.Unchanged", "true");
            return Ok(());
        }
        let update = Record::new(&record.kind, &record.id)
            .with("statecode", AttributeValue::OptionSet(Self::STATE_INACTIVE))
            .with("statuscode", AttributeValue::OptionSet(Self::STATUS_INACTIVE));
        ctx.proxy()
            .update(&update)
            .with_context(|| format!("deactivate {} {}", record.kind, record.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asyncop(id: &str, state: i32, recurring: bool) -> Record {
        let r = Record::new("asyncoperation", id).with("statecode", AttributeValue::OptionSet(state));
        if recurring {
            r.with("recurrencepattern", AttributeValue::text("FREQ=DAILY"))
        } else {
            r
        }
    }

    #[test]
    fn test_cancel_selection_skips_completed_and_recurring() {
        let c = CancelAsyncOperations.selection_criterion("caller");
        assert!(c.matches(&asyncop("a", 0, false)));
        assert!(!c.matches(&asyncop("b", 3, false)));
        assert!(!c.matches(&asyncop("c", 0, true)));
    }

    #[test]
    fn test_modes() {
        assert_eq!(PurgePluginTraces.mode(), ExecutionMode::IterativeDrain);
        assert_eq!(TrimContactNames.mode(), ExecutionMode::BoundedScan);
        assert_eq!(DeactivateContactsFromFile.mode(), ExecutionMode::InputFile);
    }

    #[test]
    fn test_contact_lookup_matches_email_only() {
        let c = DeactivateContactsFromFile::lookup("ada@example.com");
        assert_eq!(c.top_count, Some(2));
        let ada = Record::new("contact", "c1").with("emailaddress1", AttributeValue::text("ada@example.com"));
        let bob = Record::new("contact", "c2").with("emailaddress1", AttributeValue::text("bob@example.com"));
        assert!(c.matches(&ada));
        assert!(!c.matches(&bob));
    }
}
