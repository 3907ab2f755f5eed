//! Harvested entity records.

use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single content field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Count(u64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Empty values count as absent.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Count(_) => false,
            FieldValue::List(items) => items.is_empty(),
        }
    }

    /// Ordering used when two non-empty observations disagree.
    pub fn richness(&self) -> usize {
        match self {
            FieldValue::Text(s) => s.chars().count(),
            FieldValue::Count(n) => *n as usize,
            FieldValue::List(items) => items.len(),
        }
    }

    /// Flat string form used for tabular export.
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Count(n) => n.to_string(),
            FieldValue::List(items) => items.join(";"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// Content fields keyed by name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A harvested entity: identity plus whatever content has been observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub identity: Identity,
    pub fields: FieldMap,
}

impl Entity {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            fields: FieldMap::new(),
        }
    }

    /// Whether `name` holds a non-empty value.
    pub fn has(&self, name: &str) -> bool {
        self.fields.get(name).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Names from `required` that are still absent.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.has(name))
            .map(String::as_str)
            .collect()
    }

    /// Fold `incoming` into this entity. Returns `true` if anything changed.
    ///
    /// Empty values never replace anything. When both sides are non-empty the
    /// richer value wins; ties keep the existing value.
    pub fn merge_fields(&mut self, incoming: FieldMap) -> bool {
        let mut changed = false;
        for (name, value) in incoming {
            if value.is_empty() {
                continue;
            }
            let replace = match self.fields.get(&name) {
                None => true,
                Some(existing) if existing.is_empty() => true,
                Some(existing) => value.richness() > existing.richness(),
            };
            if replace {
                self.fields.insert(name, value);
                changed = true;
            }
        }
        changed
    }

    /// Fill only the fields that are currently absent.
    pub fn backfill(&mut self, incoming: FieldMap) -> usize {
        let mut filled = 0;
        for (name, value) in incoming {
            if value.is_empty() || self.has(&name) {
                continue;
            }
            self.fields.insert(name, value);
            filled += 1;
        }
        filled
    }

    /// Flat record for export: reference and token under the given column
    /// names, followed by the content fields.
    pub fn to_record(
        &self,
        reference_column: &str,
        token_column: &str,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut record = serde_json::Map::new();
        record.insert(
            reference_column.to_string(),
            serde_json::Value::String(self.identity.reference.clone()),
        );
        record.insert(
            token_column.to_string(),
            self.identity
                .token
                .clone()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        );
        for (name, value) in &self.fields {
            let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            record.insert(name.clone(), json);
        }
        record
    }
}
