//! `harvest collect <profile>`: run a collection and export the result.

use super::{output, profiles_cmd};
use crate::collector::{collect_subjects, merge_runs, CollectOptions};
use crate::driver::chromium::ChromiumBrowser;
use crate::driver::PageDriver;
use crate::export;
use crate::progress::{self, ProgressEventKind, ProgressReceiver};
use crate::session::{resolve_auth_state_path, StorageState};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Arguments for one collection run.
#[derive(Debug, Clone)]
pub struct CollectArgs {
    pub profile: String,
    /// Subjects collected one after another into a single export.
    pub subjects: Vec<String>,
    pub profile_file: Option<PathBuf>,
    pub auth_state: Option<String>,
    pub out_dir: PathBuf,
    pub headful: bool,
    pub options: CollectOptions,
}

/// Run the collect command.
pub async fn run(args: CollectArgs) -> Result<()> {
    let profile = profiles_cmd::load(args.profile_file.as_deref())?
        .into_iter()
        .find(|p| p.name == args.profile)
        .with_context(|| format!("unknown profile '{}'", args.profile))?;
    let base = profile.base()?;
    let host = base.host_str().unwrap_or_default();

    let state_path = resolve_auth_state_path(args.auth_state.as_deref());
    let session = StorageState::load(&state_path)?;
    info!(
        path = %state_path.display(),
        cookies = session.cookies_for(host).len(),
        host,
        "session loaded"
    );

    let browser = ChromiumBrowser::launch(!args.headful).await?;
    let page = browser.open_page(&session, host).await?;

    let (tx, rx) = progress::channel();
    let spinner = (!output::is_quiet() && !output::is_json()).then(|| spawn_spinner(rx));

    let runs = collect_subjects(&page, &profile, &args.options, &args.subjects, Some(tx)).await;

    if let Some(handle) = spinner {
        // Every sender is gone once the runs return, so the spinner task ends.
        let _ = handle.await;
    }
    if let Err(e) = Box::new(page).close().await {
        debug!("closing page: {e:#}");
    }
    debug!(open = browser.active_contexts(), "pages left before shutdown");
    if let Err(e) = browser.close().await {
        debug!("{e:#}");
    }
    let runs = runs?;
    let items = merge_runs(&runs);

    let export_name = if args.subjects.is_empty() {
        profile.name.clone()
    } else {
        format!("{}-{}", profile.name, args.subjects.join("-"))
    };
    let (json_path, csv_path) =
        export::write_all(&args.out_dir, &export_name, &items, &profile.output)?;

    if output::is_json() {
        let per_subject: Vec<_> = runs
            .iter()
            .map(|run| {
                serde_json::json!({
                    "subject": run.subject,
                    "total": run.result.total,
                    "duration_ms": run.result.duration_ms,
                    "outcome": run.result.outcome,
                    "subject_fields": run.result.subject_fields,
                })
            })
            .collect();
        output::print_json(&serde_json::json!({
            "total": items.len(),
            "runs": per_subject,
            "json": json_path,
            "csv": csv_path,
        }));
    } else if !output::is_quiet() {
        for run in &runs {
            let result = &run.result;
            let label = run.subject.as_deref().unwrap_or(&profile.name);
            println!(
                "  {label}: {} items in {:.1}s ({}, {} passes)",
                result.total,
                result.duration_ms as f64 / 1000.0,
                result.outcome.reason,
                result.outcome.passes
            );
            if let Some(report) = &result.outcome.enrichment {
                println!(
                    "    enriched {}/{} ({} failed, {} fields filled)",
                    report.succeeded, report.attempted, report.failed, report.fields_filled
                );
            }
        }
        if runs.len() > 1 {
            println!("  Collected {} items across {} subjects", items.len(), runs.len());
        }
        println!("  JSON: {}", json_path.display());
        println!("  CSV:  {}", csv_path.display());
    }
    Ok(())
}

fn spawn_spinner(mut rx: ProgressReceiver) -> tokio::task::JoinHandle<()> {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("  {spinner} {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message("starting");

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.event {
                    ProgressEventKind::PhaseChanged { phase } => bar.set_message(phase.to_string()),
                    ProgressEventKind::TargetDetected { target } => {
                        bar.println(format!("  target: {target}"))
                    }
                    ProgressEventKind::PassCompleted {
                        pass, size, streak, ..
                    } => bar.set_message(format!("pass {pass}: {size} items (flat {streak})")),
                    ProgressEventKind::EnrichmentProgress { done, total, failed } => {
                        bar.set_message(format!("enriching {done}/{total} ({failed} failed)"))
                    }
                    ProgressEventKind::RunComplete { total, .. } => {
                        bar.println(format!("  run complete: {total} items"))
                    }
                    ProgressEventKind::Warning { message } => bar.println(format!("  ! {message}")),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        bar.finish_and_clear();
    })
}
