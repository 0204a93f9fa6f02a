//! Which values of a row can become entities, and how they are labelled.

use std::collections::HashSet;

use civis_core::{render_value, FieldSelector, ResourceFormat, Row, NO_DATA_SENTINEL, SUB_ENTRY_KEYS};
use serde_json::Value;

const PLACEHOLDER_PREFIX: &str = "Unnamed:";

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCandidate {
    pub selector: FieldSelector,
    pub label: String,
    pub value: Value,
}

impl FieldCandidate {
    /// Option token, `"<kind>:<key>"`.
    pub fn token(&self) -> String { self.selector.to_string() }
}

/// Measurement candidates first (document order), then plain fields
/// (column order for tabular formats, field order otherwise).
pub fn field_candidates(format: ResourceFormat, row: &Row, columns: Option<&[String]>) -> Vec<FieldCandidate> {
    let mut out = Vec::new();
    let mut consumed: HashSet<String> = HashSet::new();

    for entry in row.sub_entries() {
        let code = entry.code.to_lowercase();
        if !consumed.insert(code.clone()) {
            continue;
        }
        let Some(value) = row.measurement_value(&entry.code).filter(is_reportable) else { continue };
        out.push(FieldCandidate {
            selector: FieldSelector::measurement(code.clone()),
            label: format!("{code} ({}): {}", entry.description, render_value(&value)),
            value,
        });
    }

    let keys: Vec<&str> = match columns {
        Some(cols) if format.is_tabular() => cols.iter().map(String::as_str).collect(),
        _ => row.fields.keys().map(String::as_str).collect(),
    };
    for key in keys {
        if SUB_ENTRY_KEYS.contains(&key) || key.starts_with(PLACEHOLDER_PREFIX) || consumed.contains(&key.to_lowercase()) {
            continue;
        }
        let Some(value) = row.get(key) else { continue };
        if value.is_null() || value.is_array() || value.is_object() {
            continue;
        }
        out.push(FieldCandidate {
            selector: FieldSelector::field(key),
            label: format!("{key}: {}", render_value(value)),
            value: value.clone(),
        });
    }
    out
}

fn is_reportable(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => s.trim() != NO_DATA_SENTINEL,
        _ => true,
    }
}
