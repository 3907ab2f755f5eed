//! JSON and CSV export of collected items.

use crate::entity::Entity;
use crate::profile::OutputRule;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// One flat record per item, columns named by the profile.
pub fn to_records(items: &[Entity], output: &OutputRule) -> Vec<Map<String, Value>> {
    items
        .iter()
        .map(|e| e.to_record(&output.reference_column, &output.token_column))
        .collect()
}

/// Column order: preferred columns first, then the rest alphabetically.
pub fn columns(records: &[Map<String, Value>], preferred: &[String]) -> Vec<String> {
    let mut columns: Vec<String> = preferred.to_vec();
    let rest: BTreeSet<&String> = records
        .iter()
        .flat_map(|r| r.keys())
        .filter(|k| !preferred.contains(k))
        .collect();
    columns.extend(rest.into_iter().cloned());
    columns
}

/// Render records as CSV text with a header row.
pub fn to_csv(records: &[Map<String, Value>], preferred: &[String]) -> String {
    let columns = columns(records, preferred);
    let mut out = String::new();
    push_row(&mut out, columns.iter().map(String::as_str));
    for record in records {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| record.get(c).map(cell).unwrap_or_default())
            .collect();
        push_row(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let row: Vec<String> = cells.map(quote).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Flat string form of a JSON value; lists are joined with `;`.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

/// Quote a cell that contains a separator, a line break or a quote.
pub fn quote(cell: &str) -> String {
    if cell.contains([',', '\n', '\r', '"']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// `<dir>/<profile>-<YYYYmmdd-HHMMSS>.<ext>`
pub fn timestamped_path(dir: &Path, profile: &str, ext: &str, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("{profile}-{}.{ext}", at.format("%Y%m%d-%H%M%S")))
}

/// Write JSON and CSV next to each other. Returns both paths.
pub fn write_all(
    dir: &Path,
    profile: &str,
    items: &[Entity],
    output: &OutputRule,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let records = to_records(items, output);
    let now = Local::now();

    let json_path = timestamped_path(dir, profile, "json", now);
    let json = serde_json::to_string_pretty(&records).context("failed to serialize items")?;
    std::fs::write(&json_path, json)
        .with_context(|| format!("failed to write {}", json_path.display()))?;

    let csv_path = timestamped_path(dir, profile, "csv", now);
    std::fs::write(&csv_path, to_csv(&records, &output.preferred_columns))
        .with_context(|| format!("failed to write {}", csv_path.display()))?;

    Ok((json_path, csv_path))
}
