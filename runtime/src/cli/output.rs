//! Global output flags and tracing setup.
//!
//! Flags are set once by `main` via environment variables so every
//! subcommand can check them without threading them through.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub fn is_quiet() -> bool {
    std::env::var_os("HARVEST_QUIET").is_some()
}

pub fn is_json() -> bool {
    std::env::var_os("HARVEST_JSON").is_some()
}

pub fn is_verbose() -> bool {
    std::env::var_os("HARVEST_VERBOSE").is_some()
}

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("  Error: cannot render JSON: {e}"),
    }
}

/// Install the tracing subscriber on stderr.
///
/// `RUST_LOG` wins when set; otherwise `harvest=info`, or debug with
/// `--verbose`.
pub fn init_tracing(log_json: bool) -> Result<()> {
    let default = if is_verbose() {
        "harvest=debug,harvest_runtime=debug"
    } else {
        "harvest=info,harvest_runtime=info"
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
