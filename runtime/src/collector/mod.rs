// Copyright 2026 Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Convergence-driven collection.
//!
//! A run navigates to the profile's start page, waits for content, then
//! repeats interact / wait / extract / fold until the store stops growing,
//! a known target is met, the source is exhausted, or a limit is hit. An
//! optional enrichment pass backfills incomplete entities afterwards.
//!
//! Only fatal errors (bad configuration, missing session, an unreachable
//! start page) are returned, and always before the first interaction.
//! Everything after that degrades to a smaller result, including a driver
//! call that never returns: the pass loop is cut off at the budget.

pub mod interact;
pub mod state;
pub mod target;

pub use state::{Phase, RunState, StopReason, StopRule};

use crate::driver::PageDriver;
use crate::enrich::{enrich, EnrichOptions, EnrichReport, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::entity::{Entity, FieldMap};
use crate::error::{HarvestError, HarvestResult};
use crate::extract::fields::read_fields;
use crate::extract::Extractor;
use crate::profile::{compile, SourceProfile, SubjectRule};
use crate::progress::{ProgressEventKind, ProgressSender, Reporter};
use crate::retry::with_retry;
use crate::store::{Candidate, Channel, DedupStore};
use interact::{advance, jittered, Step};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use target::read_target;
use tracing::{debug, info, warn};

/// Tuning for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectOptions {
    /// Fills `{subject}` in the profile's start URL.
    pub subject: Option<String>,
    /// Base pause after each interaction.
    pub interaction_delay_ms: u64,
    /// Random extra on top of `interaction_delay_ms`.
    pub jitter_ms: u64,
    /// Consecutive flat passes before converging.
    pub no_growth_threshold: u32,
    pub max_passes: u32,
    /// Wall-clock budget for the pass loop.
    pub budget_ms: u64,
    pub warmup_timeout_ms: u64,
    /// Pause after the loop for in-flight responses.
    pub settle_ms: u64,
    /// Hard cap on returned items. Also acts as a target.
    pub max_items: Option<usize>,
    pub enrichment_enabled: bool,
    pub enrichment_concurrency: usize,
    pub enrichment_delay_ms: u64,
    pub enrichment_jitter_ms: u64,
    pub navigation_timeout_ms: u64,
    /// Extra attempts for navigations.
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            subject: None,
            interaction_delay_ms: 700,
            jitter_ms: 800,
            no_growth_threshold: 3,
            max_passes: 400,
            budget_ms: 15 * 60 * 1000,
            warmup_timeout_ms: 45_000,
            settle_ms: 1500,
            max_items: None,
            enrichment_enabled: false,
            enrichment_concurrency: 2,
            enrichment_delay_ms: 300,
            enrichment_jitter_ms: 400,
            navigation_timeout_ms: 30_000,
            retry_attempts: 2,
            retry_base_delay_ms: 1000,
        }
    }
}

impl CollectOptions {
    /// Reject unusable limits and clamp the soft ones.
    pub fn validated(&self) -> HarvestResult<Self> {
        if self.max_passes == 0 {
            return Err(HarvestError::Config("max_passes must be at least 1".into()));
        }
        if self.max_items == Some(0) {
            return Err(HarvestError::Config("max_items must be at least 1".into()));
        }
        let mut options = self.clone();
        options.no_growth_threshold = options.no_growth_threshold.max(1);
        options.enrichment_concurrency = options
            .enrichment_concurrency
            .clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        Ok(options)
    }

    fn stop_rule(&self) -> StopRule {
        StopRule {
            no_growth_threshold: self.no_growth_threshold,
            max_passes: self.max_passes,
            budget: Duration::from_millis(self.budget_ms),
        }
    }

    fn enrich_options(&self) -> EnrichOptions {
        EnrichOptions {
            concurrency: self.enrichment_concurrency,
            navigation_timeout_ms: self.navigation_timeout_ms,
            retry_attempts: self.retry_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            delay_ms: self.enrichment_delay_ms,
            jitter_ms: self.enrichment_jitter_ms,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub phase: Phase,
    pub reason: StopReason,
    pub passes: u32,
    pub target: Option<usize>,
    pub enrichment: Option<EnrichReport>,
}

/// Finalized result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectResult {
    pub items: Vec<Entity>,
    pub total: usize,
    pub duration_ms: u64,
    pub outcome: RunOutcome,
    /// Subject-level fields, already stamped onto every item.
    #[serde(default)]
    pub subject_fields: FieldMap,
}

/// One run of a multi-subject collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRun {
    pub subject: Option<String>,
    pub result: CollectResult,
}

/// Collect every entity the profile's list exposes.
pub async fn collect(
    driver: &dyn PageDriver,
    profile: &SourceProfile,
    options: &CollectOptions,
    progress: Option<ProgressSender>,
) -> HarvestResult<CollectResult> {
    let options = options.validated()?;
    profile.validate()?;
    let mut extractor = Extractor::new(profile)?;
    let target_pattern = profile
        .target
        .as_ref()
        .map(|t| compile(&t.pattern))
        .transpose()?;
    let start_url = profile.start_url_for(options.subject.as_deref())?;
    let subject_url = profile.subject_url_for(options.subject.as_deref())?;

    let mut reporter = Reporter::new(progress);
    let started = Instant::now();
    let budget = Duration::from_millis(options.budget_ms);
    info!(profile = %profile.name, run_id = reporter.run_id(), url = %start_url, "collection started");

    let mut subject_fields = FieldMap::new();
    if let (Some(rule), Some(url)) = (&profile.subject_page, &subject_url) {
        subject_fields = read_subject_page(driver, rule, url, &options).await;
    }

    let landed = with_retry(
        || driver.navigate(&start_url, options.navigation_timeout_ms),
        options.retry_attempts,
        Duration::from_millis(options.retry_base_delay_ms),
    )
    .await
    .map_err(|e| HarvestError::Navigation {
        url: start_url.clone(),
        message: format!("{e:#}"),
    })?;

    let current = driver.current_url().await.unwrap_or(landed.final_url);
    if let Some(marker) = profile
        .auth_wall_markers
        .iter()
        .find(|m| current.contains(m.as_str()))
    {
        return Err(HarvestError::Precondition(format!(
            "session rejected: landed on {current} ({marker})"
        )));
    }

    extractor.attach_network(driver).await;

    reporter.emit(ProgressEventKind::PhaseChanged {
        phase: Phase::WarmingUp,
    });
    if let Err(e) = driver
        .wait_for_selector(&profile.warmup_selector, options.warmup_timeout_ms)
        .await
    {
        warn!("no content after {}ms, continuing: {e:#}", options.warmup_timeout_ms);
        reporter.emit(ProgressEventKind::Warning {
            message: "initial content did not appear".to_string(),
        });
    }
    if let (Some(rule), None) = (&profile.subject_page, &subject_url) {
        subject_fields = read_fields(driver, None, &rule.fields).await;
    }

    let mut state = RunState::new(options.stop_rule());
    if let Some(cap) = options.max_items {
        state.set_target(cap);
    }
    let mut displayed_known = false;
    let mut store = DedupStore::new();

    reporter.emit(ProgressEventKind::PhaseChanged {
        phase: Phase::Scrolling,
    });
    let reason = loop {
        let remaining = budget.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break StopReason::Budget;
        }

        let pass = state.passes() + 1;
        let step = tokio::time::timeout(remaining, async {
            if let (false, Some(rule), Some(pattern)) = (displayed_known, &profile.target, &target_pattern) {
                if let Some(displayed) = read_target(driver, rule, pattern).await {
                    info!(target = displayed, "displayed total");
                    state.set_target(displayed);
                    displayed_known = true;
                    reporter.emit(ProgressEventKind::TargetDetected { target: displayed });
                }
            }

            if advance(driver, &profile.interaction, pass).await == Step::Exhausted {
                return None;
            }
            driver
                .wait(jittered(options.interaction_delay_ms, options.jitter_ms))
                .await;
            Some(extractor.pass(driver).await)
        })
        .await;

        let harvest = match step {
            Ok(Some(harvest)) => harvest,
            Ok(None) => break StopReason::Exhausted,
            Err(_) => {
                warn!(pass, "pass still running when the budget ran out");
                break StopReason::Budget;
            }
        };
        let counts = harvest.counts;
        let inserted = store.merge_all(harvest.candidates);
        let stop = state.observe(store.len(), started.elapsed());

        debug!(
            pass,
            size = store.len(),
            inserted,
            streak = state.streak(),
            structured = counts.structured,
            text = counts.text,
            network = counts.network,
            "pass complete"
        );
        reporter.emit(ProgressEventKind::PassCompleted {
            pass,
            size: store.len(),
            inserted,
            streak: state.streak(),
            structured: counts.structured,
            text: counts.text,
            network: counts.network,
        });

        if let Some(reason) = stop {
            break reason;
        }
    };

    driver.wait(options.settle_ms).await;
    let late = store.merge_all(extractor.drain_network());
    if late > 0 {
        debug!(late, "identities from in-flight responses");
    }
    extractor.detach_network(driver).await;

    let phase = reason.phase();
    reporter.emit(ProgressEventKind::PhaseChanged { phase });
    info!(%phase, %reason, passes = state.passes(), size = store.len(), "pass loop finished");

    let mut items = store.into_entities();
    if let Some(cap) = options.max_items {
        items.truncate(cap);
    }
    if !subject_fields.is_empty() {
        for item in &mut items {
            item.backfill(subject_fields.clone());
        }
    }

    let enrichment = match (&profile.enrichment, options.enrichment_enabled) {
        (Some(rule), true) => Some(
            enrich(
                driver,
                &mut items,
                rule,
                &options.enrich_options(),
                &mut reporter,
            )
            .await,
        ),
        _ => None,
    };

    let total = items.len();
    let duration_ms = started.elapsed().as_millis() as u64;
    reporter.emit(ProgressEventKind::RunComplete {
        total,
        passes: state.passes(),
        reason,
        elapsed_ms: duration_ms,
    });
    info!(total, duration_ms, %phase, "collection finished");

    Ok(CollectResult {
        items,
        total,
        duration_ms,
        outcome: RunOutcome {
            phase,
            reason,
            passes: state.passes(),
            target: state.target(),
            enrichment,
        },
        subject_fields,
    })
}

/// Visit the subject's own page and read its fields. Nothing here is fatal;
/// an unreachable page just leaves the items unstamped.
async fn read_subject_page(
    driver: &dyn PageDriver,
    rule: &SubjectRule,
    url: &str,
    options: &CollectOptions,
) -> FieldMap {
    let landed = with_retry(
        || driver.navigate(url, options.navigation_timeout_ms),
        options.retry_attempts,
        Duration::from_millis(options.retry_base_delay_ms),
    )
    .await;
    if let Err(e) = landed {
        warn!("subject page {url} unavailable: {e:#}");
        return FieldMap::new();
    }
    if let Some(ready) = &rule.ready_selector {
        if let Err(e) = driver.wait_for_selector(ready, options.warmup_timeout_ms).await {
            debug!("subject page not ready: {e:#}");
        }
    }
    let fields = read_fields(driver, None, &rule.fields).await;
    debug!(fields = fields.len(), "subject page read");
    fields
}

/// Collect the same profile once per subject, in order.
///
/// With no subjects this is a single run using `options.subject`. A fatal
/// error on any subject ends the whole batch.
pub async fn collect_subjects(
    driver: &dyn PageDriver,
    profile: &SourceProfile,
    options: &CollectOptions,
    subjects: &[String],
    progress: Option<ProgressSender>,
) -> HarvestResult<Vec<SubjectRun>> {
    if subjects.is_empty() {
        let result = collect(driver, profile, options, progress).await?;
        return Ok(vec![SubjectRun {
            subject: options.subject.clone(),
            result,
        }]);
    }

    let mut runs = Vec::with_capacity(subjects.len());
    for subject in subjects {
        info!(%subject, "collecting subject");
        let options = CollectOptions {
            subject: Some(subject.clone()),
            ..options.clone()
        };
        let result = collect(driver, profile, &options, progress.clone()).await?;
        runs.push(SubjectRun {
            subject: Some(subject.clone()),
            result,
        });
    }
    Ok(runs)
}

/// Fold several runs into one sequence, first-seen order, no duplicates.
pub fn merge_runs(runs: &[SubjectRun]) -> Vec<Entity> {
    let mut store = DedupStore::new();
    for run in runs {
        store.merge_all(run.result.items.iter().cloned().map(|entity| Candidate {
            identity: entity.identity,
            fields: entity.fields,
            channel: Channel::Structured,
        }));
    }
    store.into_entities()
}
