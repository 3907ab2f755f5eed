//! Structured channel: records found by element query.

use super::fields::read_fields;
use crate::driver::{ElementHandle, PageDriver};
use crate::entity::FieldMap;
use crate::error::{HarvestError, HarvestResult};
use crate::identity::{Identity, Normalizer};
use crate::profile::{compile, RecordRule, ReferenceRule};
use crate::store::{Candidate, Channel};
use fnv::FnvHasher;
use regex::Regex;
use std::hash::Hasher;
use tracing::debug;

/// A record rule with its capture regex compiled once.
struct CompiledRule {
    rule: RecordRule,
    capture: Option<Regex>,
}

/// Reads every configured record kind from the rendered list.
pub struct StructuredReader {
    rules: Vec<CompiledRule>,
}

impl StructuredReader {
    pub fn new(rules: &[RecordRule]) -> HarvestResult<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let capture = rule.reference.capture.as_deref().map(compile).transpose()?;
                Ok(CompiledRule {
                    rule: rule.clone(),
                    capture,
                })
            })
            .collect::<HarvestResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// One structured sweep over the current page.
    pub async fn read(&self, driver: &dyn PageDriver, normalizer: &Normalizer) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for compiled in &self.rules {
            let records = match driver.query_all(&compiled.rule.selector).await {
                Ok(records) => records,
                Err(e) => {
                    debug!("{}", HarvestError::extraction("structured", e));
                    continue;
                }
            };
            for record in records {
                if let Some(candidate) = self.read_record(driver, normalizer, compiled, record).await {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    async fn read_record(
        &self,
        driver: &dyn PageDriver,
        normalizer: &Normalizer,
        compiled: &CompiledRule,
        record: ElementHandle,
    ) -> Option<Candidate> {
        let rule = &compiled.rule;
        if let Some(require) = &rule.require {
            match driver.query_within(record, require).await {
                Ok(found) if !found.is_empty() => {}
                _ => return None,
            }
        }

        let fields = read_fields(driver, Some(record), &rule.fields).await;
        if rule
            .required_fields
            .iter()
            .any(|name| fields.get(name).map_or(true, |v| v.is_empty()))
        {
            return None;
        }

        let identity = match read_reference(driver, record, &rule.reference).await {
            Some(raw) => {
                let raw = match &compiled.capture {
                    Some(capture) => apply_capture(&raw, capture, rule.reference.template.as_deref())?,
                    None => raw,
                };
                normalizer.identity(&raw)
            }
            None => None,
        };
        let identity = match identity {
            Some(identity) => identity,
            None => fallback_identity(&fields, &rule.fallback_identity)?,
        };

        Some(Candidate {
            identity,
            fields,
            channel: Channel::Structured,
        })
    }
}

/// Raw reference attribute: on the record itself, or on the first fallback
/// selector below it that carries the attribute.
async fn read_reference(
    driver: &dyn PageDriver,
    record: ElementHandle,
    rule: &ReferenceRule,
) -> Option<String> {
    if rule.selectors.is_empty() {
        return driver
            .attribute(record, &rule.attribute)
            .await
            .ok()
            .flatten()
            .filter(|v| !v.trim().is_empty());
    }
    for selector in &rule.selectors {
        let Ok(found) = driver.query_within(record, selector).await else {
            continue;
        };
        for el in found {
            if let Ok(Some(value)) = driver.attribute(el, &rule.attribute).await {
                if !value.trim().is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Cut group 1 out of `raw` and place it into `template` (`{1}`).
fn apply_capture(raw: &str, capture: &Regex, template: Option<&str>) -> Option<String> {
    let group = capture.captures(raw)?.get(1)?.as_str();
    Some(match template {
        Some(template) => template.replace("{1}", group),
        None => group.to_string(),
    })
}

/// Content-hash identity for records with no usable reference.
///
/// Returns `None` when every fallback field is empty.
fn fallback_identity(fields: &FieldMap, names: &[String]) -> Option<Identity> {
    let mut hasher = FnvHasher::default();
    let mut any = false;
    for name in names {
        if let Some(value) = fields.get(name).filter(|v| !v.is_empty()) {
            hasher.write(name.as_bytes());
            hasher.write(value.to_cell().as_bytes());
            any = true;
        }
        hasher.write_u8(0);
    }
    any.then(|| Identity::synthetic(hasher.finish()))
}
