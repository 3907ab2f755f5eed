//! Best-effort read of the displayed total ("1,234 connections").

use crate::driver::PageDriver;
use crate::profile::TargetRule;
use regex::Regex;

/// Parse the first capture of `pattern` as a count with thousands separators.
pub fn parse_target(text: &str, pattern: &Regex) -> Option<usize> {
    let caps = pattern.captures(text)?;
    let digits: String = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|&n: &usize| n > 0)
}

/// First visible element text across `rule.selectors` that parses.
pub async fn read_target(driver: &dyn PageDriver, rule: &TargetRule, pattern: &Regex) -> Option<usize> {
    for selector in &rule.selectors {
        let Ok(elements) = driver.query_all(selector).await else {
            continue;
        };
        for el in elements {
            if !driver.visible(el).await.unwrap_or(false) {
                continue;
            }
            if let Ok(text) = driver.text(el).await {
                if let Some(n) = parse_target(&text, pattern) {
                    return Some(n);
                }
            }
        }
    }
    None
}
