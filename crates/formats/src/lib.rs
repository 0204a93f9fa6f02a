//! civis formats: one normalizer per resource format, all producing the
//! same row model, plus the rules deciding which values become entities.

#![forbid(unsafe_code)]

pub mod candidates;
pub mod json;
mod load;
pub mod table;
pub mod wfs;
pub mod xml;

use bytes::Bytes;
use civis_core::{BridgeError, BridgeResult, ResourceFormat, Row, Settings};
use serde_json::Value;

pub use candidates::{field_candidates, FieldCandidate};
pub use load::{load_rows, GeoMode, SourceRef};

/// Normalized payload: optional column order (tabular and keyed formats) and rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Normalized {
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Row>,
}

/// A fetched payload before normalization.
#[derive(Debug, Clone)]
pub enum RawPayload {
    Json(Value),
    Features(Vec<Value>),
    Bytes(Bytes),
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// JSON pointer to the XML record list.
    pub xml_records_path: Option<String>,
}

impl NormalizeOptions {
    pub fn from_settings(s: &Settings) -> Self { Self { xml_records_path: s.xml_records_path.clone() } }
}

pub fn normalize(format: ResourceFormat, payload: &RawPayload) -> BridgeResult<Normalized> {
    normalize_with(format, payload, &NormalizeOptions::default())
}

pub fn normalize_with(format: ResourceFormat, payload: &RawPayload, opts: &NormalizeOptions) -> BridgeResult<Normalized> {
    match (format, payload) {
        (ResourceFormat::Json, RawPayload::Json(doc)) => json::normalize(doc),
        (ResourceFormat::Json, RawPayload::Features(list)) => json::normalize(&Value::Array(list.clone())),
        (ResourceFormat::Json, RawPayload::Bytes(b)) => {
            let doc: Value =
                serde_json::from_slice(b).map_err(|e| BridgeError::FormatParse(format!("invalid json: {e}")))?;
            json::normalize(&doc)
        }
        (ResourceFormat::Xlsx | ResourceFormat::Xls, RawPayload::Bytes(b)) => table::spreadsheet(b),
        (ResourceFormat::Csv, RawPayload::Bytes(b)) => table::csv(b),
        (ResourceFormat::Xml, RawPayload::Bytes(b)) => xml::normalize(b, opts.xml_records_path.as_deref()),
        (ResourceFormat::Wfs, RawPayload::Features(list)) => Ok(wfs::normalize(list)),
        (ResourceFormat::Wfs, RawPayload::Json(doc)) => {
            let list = doc.get("features").and_then(Value::as_array).or_else(|| doc.as_array());
            Ok(wfs::normalize(list.map(Vec::as_slice).unwrap_or_default()))
        }
        (format, _) => Err(BridgeError::FormatParse(format!("payload shape does not match {format}"))),
    }
}
