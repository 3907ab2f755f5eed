// Copyright 2026 Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Parser, Subcommand};
use harvest_runtime::cli::{self, collect_cmd::CollectArgs, output};
use harvest_runtime::CollectOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Harvest: convergence-driven collector for virtualized web lists",
    version,
    after_help = "Run 'harvest <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Replace the built-in profiles with this JSON file
    #[arg(long, global = true)]
    profile_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect every entity of a list and export JSON + CSV
    Collect {
        /// Profile name (see `harvest profiles`)
        profile: String,
        /// Fills `{subject}` in the profile's start URL (e.g. a username).
        /// Repeat or comma-separate to collect several subjects into one export.
        #[arg(long = "subject", value_delimiter = ',')]
        subjects: Vec<String>,
        /// Session storage-state file
        #[arg(long)]
        auth_state: Option<String>,
        /// Output directory
        #[arg(long, default_value = "output")]
        out: PathBuf,
        /// Show the browser window
        #[arg(long)]
        headful: bool,
        /// Base delay after each interaction in milliseconds
        #[arg(long, default_value = "700")]
        delay: u64,
        /// Consecutive passes without growth before stopping
        #[arg(long, default_value = "3")]
        no_growth: u32,
        /// Maximum number of passes
        #[arg(long, default_value = "400")]
        max_passes: u32,
        /// Wall-clock budget for the pass loop in seconds
        #[arg(long, default_value = "900")]
        budget: u64,
        /// Stop after this many items
        #[arg(long)]
        max_items: Option<usize>,
        /// Visit detail pages to fill missing fields
        #[arg(long)]
        enrich: bool,
        /// Parallel detail visits (1-5)
        #[arg(long, default_value = "2")]
        concurrency: usize,
    },
    /// List available source profiles
    Profiles,
    /// Check environment and diagnose issues
    Doctor {
        /// Session storage-state file
        #[arg(long)]
        auth_state: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("HARVEST_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("HARVEST_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("HARVEST_VERBOSE", "1");
    }
    output::init_tracing(cli.log_json)?;

    let profile_file = cli.profile_file.as_deref();
    let result = match cli.command {
        Commands::Collect {
            profile,
            subjects,
            auth_state,
            out,
            headful,
            delay,
            no_growth,
            max_passes,
            budget,
            max_items,
            enrich,
            concurrency,
        } => {
            let options = CollectOptions {
                interaction_delay_ms: delay,
                no_growth_threshold: no_growth,
                max_passes,
                budget_ms: budget.saturating_mul(1000),
                max_items,
                enrichment_enabled: enrich,
                enrichment_concurrency: concurrency,
                ..CollectOptions::default()
            };
            cli::collect_cmd::run(CollectArgs {
                profile,
                subjects,
                profile_file: profile_file.map(PathBuf::from),
                auth_state,
                out_dir: out,
                headful,
                options,
            })
            .await
        }
        Commands::Profiles => cli::profiles_cmd::run(profile_file).await,
        Commands::Doctor { auth_state } => cli::doctor::run(auth_state.as_deref(), profile_file).await,
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if output::is_json() {
            output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else if !output::is_quiet() {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
