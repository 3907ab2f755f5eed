//! Detail-page enrichment with bounded concurrency.
//!
//! Each incomplete entity is visited at its own reference in a fresh
//! isolated context. In-flight tasks never touch the entity list; they
//! return `(index, patch)` and the pool owner backfills the patch into the
//! entity at that index.

use crate::collector::interact::jittered;
use crate::driver::PageDriver;
use crate::entity::{Entity, FieldMap};
use crate::error::{HarvestError, HarvestResult};
use crate::extract::fields::read_fields;
use crate::profile::{EnrichmentRule, FieldRule};
use crate::progress::{ProgressEventKind, Reporter};
use crate::retry::with_retry;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Concurrency bounds for the pool.
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 5;

/// Tuning for one enrichment pass.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub concurrency: usize,
    pub navigation_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Politeness pause after each item.
    pub delay_ms: u64,
    pub jitter_ms: u64,
}

/// Outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichReport {
    /// Entities that needed a detail visit.
    pub attempted: usize,
    /// Visits that completed (even if they found nothing new).
    pub succeeded: usize,
    pub failed: usize,
    pub fields_filled: usize,
}

struct Job {
    index: usize,
    reference: String,
    fields: Vec<FieldRule>,
}

/// Backfill missing fields of `items` from their detail pages.
pub async fn enrich(
    driver: &dyn PageDriver,
    items: &mut [Entity],
    rule: &EnrichmentRule,
    options: &EnrichOptions,
    reporter: &mut Reporter,
) -> EnrichReport {
    let jobs: Vec<Job> = items
        .iter()
        .enumerate()
        .filter(|(_, entity)| !entity.identity.is_synthetic())
        .filter(|(_, entity)| !entity.missing(&rule.required).is_empty())
        .map(|(index, entity)| Job {
            index,
            reference: entity.identity.reference.clone(),
            fields: rule
                .fields
                .iter()
                .filter(|f| !entity.has(&f.name))
                .cloned()
                .collect(),
        })
        .filter(|job| !job.fields.is_empty())
        .collect();

    let mut report = EnrichReport {
        attempted: jobs.len(),
        ..EnrichReport::default()
    };
    if jobs.is_empty() {
        return report;
    }

    let concurrency = options.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
    info!(items = jobs.len(), concurrency, "enriching incomplete entities");

    let ready = rule.ready_selector.as_deref();
    let mut results = stream::iter(jobs)
        .map(move |job| async move {
            let result = enrich_one(driver, &job.reference, &job.fields, ready, options).await;
            driver.wait(jittered(options.delay_ms, options.jitter_ms)).await;
            (job.index, result)
        })
        .buffer_unordered(concurrency);

    while let Some((index, result)) = results.next().await {
        match result {
            Ok(patch) => {
                let filled = items[index].backfill(patch);
                debug!(reference = %items[index].identity.reference, filled, "enriched");
                report.succeeded += 1;
                report.fields_filled += filled;
            }
            Err(e) => {
                warn!("{e}");
                report.failed += 1;
            }
        }
        reporter.emit(ProgressEventKind::EnrichmentProgress {
            done: report.succeeded + report.failed,
            total: report.attempted,
            failed: report.failed,
        });
    }

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        fields_filled = report.fields_filled,
        "enrichment finished"
    );
    report
}

/// Visit one detail page in its own context. The context is always closed.
async fn enrich_one(
    driver: &dyn PageDriver,
    reference: &str,
    fields: &[FieldRule],
    ready_selector: Option<&str>,
    options: &EnrichOptions,
) -> HarvestResult<FieldMap> {
    let failed = |e: anyhow::Error| HarvestError::Enrichment {
        reference: reference.to_string(),
        message: format!("{e:#}"),
    };

    let context = driver.new_isolated_context().await.map_err(failed)?;
    let result = read_detail(context.as_ref(), reference, fields, ready_selector, options)
        .await
        .map_err(failed);
    if let Err(e) = context.close().await {
        debug!(reference, "closing enrichment context: {e:#}");
    }
    result
}

async fn read_detail(
    page: &dyn PageDriver,
    reference: &str,
    fields: &[FieldRule],
    ready_selector: Option<&str>,
    options: &EnrichOptions,
) -> anyhow::Result<FieldMap> {
    with_retry(
        || page.navigate(reference, options.navigation_timeout_ms),
        options.retry_attempts,
        Duration::from_millis(options.retry_base_delay_ms),
    )
    .await?;
    if let Some(selector) = ready_selector {
        if let Err(e) = page
            .wait_for_selector(selector, options.navigation_timeout_ms)
            .await
        {
            debug!(reference, "detail page not ready: {e:#}");
        }
    }
    Ok(read_fields(page, None, fields).await)
}
