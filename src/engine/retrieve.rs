//! Retrieval through the main proxy with an outer retry per page.

use anyhow::{Context, Result};

use crate::connector::{ConnectionPool, RetryPolicy};
use crate::logging::JobLogger;
use crate::types::{Criterion, PageInfo, Record, RecordPage};

/// One page (or `top_count` rows) for `criterion`. Every failed attempt is logged; the last
/// fault is returned with "reached max retries".
pub fn retrieve_page(
    pool: &ConnectionPool,
    logger: &dyn JobLogger,
    policy: &RetryPolicy,
    criterion: &Criterion,
    job_name: &str,
) -> Result<RecordPage> {
    let attempts = policy.max_attempts.max(1);
    policy
        .run(
            |_| pool.main_proxy().retrieve_multiple(criterion),
            |fault, attempt| {
                let mut props = fault.details();
                props.insert("Try count".into(), format!("{attempt}/{attempts}"));
                props.insert("Query.Kind".into(), criterion.kind.clone());
                let err = anyhow::Error::new(fault.clone()).context("retrieve records");
                logger.log_exception(&err, &props, Some(job_name));
            },
        )
        .with_context(|| format!("retrieve {}: reached max retries ({attempts})", criterion.kind))
}

/// Whole selection: start at page 1 and follow the cookie while `more_records`.
pub fn retrieve_all(
    pool: &ConnectionPool,
    logger: &dyn JobLogger,
    policy: &RetryPolicy,
    criterion: &mut Criterion,
    page_size: usize,
    job_name: &str,
) -> Result<Vec<Record>> {
    criterion.top_count = None;
    criterion.page = Some(PageInfo::first(page_size));
    let mut records = Vec::new();
    loop {
        let page = retrieve_page(pool, logger, policy, criterion, job_name)?;
        let fetched = page.records.len();
        records.extend(page.records);
        let Some(info) = criterion.page.as_mut() else {
            break;
        };
        logger.log_debug(&format!(
            "Retrieving {} records [Page = {} | Records retrieved = {}]",
            criterion.kind,
            info.page_number,
            records.len()
        ));
        if !page.more_records {
            break;
        }
        if fetched == 0 {
            anyhow::bail!(
                "retrieve {}: page {} was empty but more records were reported",
                criterion.kind,
                info.page_number
            );
        }
        info.paging_cookie = page.paging_cookie;
        info.page_number += 1;
    }
    Ok(records)
}
