//! Normalized rows, coded sub-entries and field selectors.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::BridgeError;

/// Keys holding coded sub-entries: `measurements` (JSON) and `graphics` (XML).
pub const SUB_ENTRY_KEYS: [&str; 2] = ["measurements", "graphics"];

/// Upstream marker for "no data" in XML graphics.
pub const NO_DATA_SENTINEL: &str = "--";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Geographic identity of a row produced from a feature collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeatureMeta {
    pub id: Option<String>,
    pub point: Option<GeoPoint>,
}

/// One normalized record. Missing values are `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Row {
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureMeta>,
}

/// A coded, described sub-value of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct SubEntry {
    pub code: String,
    pub description: String,
    pub value: Option<Value>,
}

impl Row {
    pub fn new(fields: Map<String, Value>) -> Self { Self { fields, feature: None } }

    /// Wrap a JSON object; anything else is not a row.
    pub fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Object(fields) => Some(Self::new(fields)),
            _ => None,
        }
    }

    /// Case-sensitive field lookup.
    pub fn get(&self, field: &str) -> Option<&Value> { self.fields.get(field) }

    /// The row's own `name` field, when it carries a usable one.
    pub fn name(&self) -> Option<String> {
        match self.fields.get("name")? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            v => Some(render_value(v)),
        }
    }

    pub fn first_value(&self) -> Option<&Value> { self.fields.values().next() }

    /// True when every field is null or an empty string.
    pub fn is_blank(&self) -> bool { self.fields.values().all(is_empty_cell) }

    /// Sub-entries with both a code and a description, in document order.
    pub fn sub_entries(&self) -> Vec<SubEntry> {
        let mut out = Vec::new();
        for key in SUB_ENTRY_KEYS {
            let Some(list) = self.fields.get(key) else { continue };
            for item in entry_items(list) {
                let code = item.get("code").filter(|v| !is_empty_cell(v)).map(render_value);
                let description = item.get("description").filter(|v| !is_empty_cell(v)).map(render_value);
                if let (Some(code), Some(description)) = (code, description) {
                    out.push(SubEntry { code, description, value: item.get("value").cloned() });
                }
            }
        }
        out
    }

    /// Sub-entry by code, case-insensitive.
    pub fn sub_entry(&self, code: &str) -> Option<SubEntry> {
        let code = code.to_lowercase();
        self.sub_entries().into_iter().find(|e| e.code.to_lowercase() == code)
    }

    /// Value of a coded measurement: the top-level field named like the code
    /// (case-insensitive), else the entry's own `value`.
    pub fn measurement_value(&self, code: &str) -> Option<Value> {
        let lower = code.to_lowercase();
        let top = self
            .fields
            .iter()
            .filter(|(k, _)| !SUB_ENTRY_KEYS.contains(&k.as_str()))
            .find(|(k, v)| k.to_lowercase() == lower && !v.is_null())
            .map(|(_, v)| v.clone());
        top.or_else(|| self.sub_entry(code).and_then(|e| e.value))
    }

    /// Read the value a selector points at.
    pub fn resolve(&self, selector: &FieldSelector) -> Option<Value> {
        match selector.kind {
            FieldKind::Field => self.get(&selector.key).cloned(),
            FieldKind::Measurement => self.measurement_value(&selector.key),
        }
    }

    /// All fields except `key` and the sub-entry lists.
    pub fn attributes_without(&self, key: &str) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != key && !SUB_ENTRY_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// A sub-entry list may arrive as an array, a single object, or (from XML) a
// wrapper object holding one repeated child element.
fn entry_items(list: &Value) -> Vec<&Map<String, Value>> {
    match list {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(obj) if obj.contains_key("code") => vec![obj],
        Value::Object(obj) if obj.len() == 1 => obj.values().next().map(entry_items).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn is_empty_cell(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Human rendering of a cell; `null` renders as `N/A`.
pub fn render_value(v: &Value) -> String {
    match v {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Field,
    Measurement,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Measurement => "measurement",
        }
    }
}

/// What to read from a row. Measurement keys are matched case-insensitively at read time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FieldSelector {
    pub kind: FieldKind,
    pub key: String,
}

impl FieldSelector {
    pub fn field(key: impl Into<String>) -> Self { Self { kind: FieldKind::Field, key: key.into() } }
    pub fn measurement(key: impl Into<String>) -> Self { Self { kind: FieldKind::Measurement, key: key.into() } }
}

impl std::fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.key)
    }
}

impl FromStr for FieldSelector {
    type Err = BridgeError;

    /// Parses `"<kind>:<key>"`; the key may itself contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, key) = s
            .split_once(':')
            .ok_or_else(|| BridgeError::Validation(format!("field token without kind: {s}")))?;
        if key.is_empty() {
            return Err(BridgeError::Validation(format!("field token without key: {s}")));
        }
        let kind = match kind {
            "field" => FieldKind::Field,
            "measurement" => FieldKind::Measurement,
            other => return Err(BridgeError::Validation(format!("unknown field kind: {other}"))),
        };
        Ok(Self { kind, key: key.to_string() })
    }
}
