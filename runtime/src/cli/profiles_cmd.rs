//! `harvest profiles`: list the available source profiles.

use super::output;
use crate::profile::{builtin_profiles, load_profiles, Interaction, SourceProfile};
use anyhow::Result;
use std::path::Path;

/// Load profiles from `file`, or the built-in set.
pub fn load(file: Option<&Path>) -> Result<Vec<SourceProfile>> {
    let profiles = match file {
        Some(path) => load_profiles(path)?,
        None => builtin_profiles()?,
    };
    Ok(profiles)
}

/// Run the profiles command.
pub async fn run(file: Option<&Path>) -> Result<()> {
    let profiles = load(file)?;

    if output::is_json() {
        output::print_json(&serde_json::to_value(&profiles)?);
        return Ok(());
    }

    for profile in &profiles {
        let mode = match profile.interaction {
            Interaction::Scroll { .. } => "scroll",
            Interaction::Paginate { .. } => "paginate",
        };
        let mut channels = vec!["structured"];
        if let Some(mining) = &profile.mining {
            if mining.text_scope.is_some() {
                channels.push("text");
            }
            if mining.network.is_some() {
                channels.push("network");
            }
        }
        println!("{}", profile.name);
        println!("  {}", profile.description);
        println!("  start:       {}", profile.start_url);
        println!("  interaction: {mode}");
        println!("  channels:    {}", channels.join(", "));
        println!(
            "  enrichment:  {}",
            if profile.enrichment.is_some() { "yes" } else { "no" }
        );
        println!();
    }
    Ok(())
}
