use civis_core::{BridgeError, BridgeResult, Row};
use serde_json::Value;

use crate::Normalized;

/// A top-level list, or the list under `rows` (or `features`). Non-object
/// items are skipped.
pub fn normalize(doc: &Value) -> BridgeResult<Normalized> {
    let items = match doc {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("rows").or_else(|| map.get("features")) {
            Some(Value::Array(items)) => items,
            _ => return Err(BridgeError::FormatParse("expected a list of records or a `rows` list".into())),
        },
        _ => return Err(BridgeError::FormatParse("expected a list of records".into())),
    };
    let rows: Vec<Row> = items.iter().cloned().filter_map(Row::from_value).collect();
    let columns = rows.first().map(|r| r.fields.keys().cloned().collect());
    Ok(Normalized { columns, rows })
}
