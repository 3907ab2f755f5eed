//! Free-text channel: references mined out of rendered text or markup.
//!
//! Catches entities whose list cards do not match any structured rule
//! (layout experiments, partially rendered cards). The same miner is reused
//! for network payloads.

use crate::driver::{sanitize_js_string, PageDriver};
use crate::error::{HarvestError, HarvestResult};
use crate::identity::{Identity, Normalizer};
use crate::profile::{compile, MiningRule};
use regex::Regex;
use std::collections::HashSet;

/// Absolute and relative reference patterns.
#[derive(Debug, Clone)]
pub struct ReferenceMiner {
    absolute: Regex,
    relative: Regex,
}

impl ReferenceMiner {
    pub fn new(rule: &MiningRule) -> HarvestResult<Self> {
        Ok(Self {
            absolute: compile(&rule.absolute_pattern)?,
            relative: compile(&rule.relative_pattern)?,
        })
    }

    /// Every distinct identity mentioned in `text`, in order of appearance.
    ///
    /// Relative matches that fall inside an absolute match are not counted
    /// twice; both resolve to the same identity anyway.
    pub fn mine(&self, text: &str, normalizer: &Normalizer) -> Vec<Identity> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut covered = Vec::new();

        for m in self.absolute.find_iter(text) {
            covered.push(m.range());
            if let Some(identity) = normalizer.identity(m.as_str()) {
                if seen.insert(identity.reference.clone()) {
                    found.push(identity);
                }
            }
        }
        for m in self.relative.find_iter(text) {
            if covered.iter().any(|r| r.start <= m.start() && m.end() <= r.end) {
                continue;
            }
            if let Some(identity) = normalizer.identity(m.as_str()) {
                if seen.insert(identity.reference.clone()) {
                    found.push(identity);
                }
            }
        }
        found
    }
}

/// Read the scope's text (or markup) in one script call.
pub async fn scope_text(
    driver: &dyn PageDriver,
    scope: &str,
    include_markup: bool,
) -> HarvestResult<String> {
    let property = if include_markup { "innerHTML" } else { "innerText" };
    let script = format!(
        r#"(() => {{
            const el = document.querySelector('{}') || document.body;
            return el ? (el.{property} || '') : '';
        }})()"#,
        sanitize_js_string(scope)
    );
    let value = driver
        .evaluate(&script)
        .await
        .map_err(|e| HarvestError::extraction("text", e))?;
    Ok(value.as_str().unwrap_or_default().to_string())
}
