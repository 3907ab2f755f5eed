//! Field reading with ordered selector fallbacks.

use crate::driver::{ElementHandle, PageDriver};
use crate::entity::{FieldMap, FieldValue};
use crate::profile::{FieldKind, FieldRule};
use tracing::trace;

/// Read every rule below `scope` (or the whole page when `None`).
///
/// Fields that yield nothing are simply left out of the map.
pub async fn read_fields(
    driver: &dyn PageDriver,
    scope: Option<ElementHandle>,
    rules: &[FieldRule],
) -> FieldMap {
    let mut fields = FieldMap::new();
    for rule in rules {
        if let Some(value) = read_field(driver, scope, rule).await {
            fields.insert(rule.name.clone(), value);
        }
    }
    fields
}

/// Try each selector in order; the first one producing a usable value wins.
///
/// Lookup failures on one selector fall through to the next.
pub async fn read_field(
    driver: &dyn PageDriver,
    scope: Option<ElementHandle>,
    rule: &FieldRule,
) -> Option<FieldValue> {
    for selector in &rule.selectors {
        let found = match scope {
            Some(scope) => driver.query_within(scope, selector).await,
            None => driver.query_all(selector).await,
        };
        let elements = match found {
            Ok(elements) => elements,
            Err(e) => {
                trace!(field = %rule.name, selector, "lookup failed: {e:#}");
                continue;
            }
        };

        let value = match rule.kind {
            FieldKind::List => {
                let mut items = Vec::new();
                for el in elements {
                    if let Some(raw) = read_raw(driver, el, rule).await {
                        if !items.contains(&raw) {
                            items.push(raw);
                        }
                    }
                }
                (!items.is_empty()).then_some(FieldValue::List(items))
            }
            FieldKind::Text | FieldKind::Count => {
                let mut value = None;
                for el in elements {
                    if let Some(raw) = read_raw(driver, el, rule).await {
                        value = convert(&raw, rule.kind);
                        if value.is_some() {
                            break;
                        }
                    }
                }
                value
            }
        };
        if value.is_some() {
            return value;
        }
    }
    None
}

/// Raw cleaned string from one element, after visibility, length and
/// exclusion checks.
async fn read_raw(driver: &dyn PageDriver, el: ElementHandle, rule: &FieldRule) -> Option<String> {
    if rule.visible_only && !driver.visible(el).await.unwrap_or(false) {
        return None;
    }
    let raw = match &rule.attribute {
        Some(attr) => driver.attribute(el, attr).await.ok().flatten()?,
        None => driver.text(el).await.ok()?,
    };
    let cleaned = collapse_whitespace(&raw);
    if cleaned.is_empty() || cleaned.chars().count() < rule.min_len {
        return None;
    }
    if rule.exclude.iter().any(|needle| cleaned.contains(needle.as_str())) {
        return None;
    }
    Some(cleaned)
}

fn convert(raw: &str, kind: FieldKind) -> Option<FieldValue> {
    match kind {
        FieldKind::Count => parse_count(raw).map(FieldValue::Count),
        _ => Some(FieldValue::Text(raw.to_string())),
    }
}

/// Trim and collapse inner whitespace runs to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First number in `text`, thousands separators allowed ("1,234 reactions").
pub fn parse_count(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
