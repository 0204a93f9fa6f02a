//! Tabular payloads: workbooks (calamine) and delimited text (csv).
//!
//! Both end up in [`from_grid`]: the first row is the header, the rest are
//! records keyed by header name.

use std::collections::HashSet;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use civis_core::{BridgeError, BridgeResult, Row};
use serde_json::{Map, Number, Value};

use crate::Normalized;

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Header names: trimmed, blanks become `Unnamed: {i}`, duplicates get `.1`, `.2`, ...
pub fn header_names(raw: &[Option<String>]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for (i, cell) in raw.iter().enumerate() {
        let base = match cell.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => format!("Unnamed: {i}"),
        };
        let mut name = base.clone();
        let mut n = 1;
        while used.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        used.insert(name.clone());
        out.push(name);
    }
    out
}

/// Build rows from a header and body cells. Rows that are entirely empty or
/// whose first cell is empty are dropped.
pub fn from_grid(header: &[Option<String>], body: impl IntoIterator<Item = Vec<Value>>) -> Normalized {
    let columns = header_names(header);
    let mut rows = Vec::new();
    for cells in body {
        if cells.first().map_or(true, Value::is_null) || cells.iter().all(Value::is_null) {
            continue;
        }
        let mut fields = Map::new();
        for (i, col) in columns.iter().enumerate() {
            fields.insert(col.clone(), cells.get(i).cloned().unwrap_or(Value::Null));
        }
        rows.push(Row::new(fields));
    }
    Normalized { columns: Some(columns), rows }
}

/// First worksheet of an XLSX/XLS workbook.
pub fn spreadsheet(bytes: &[u8]) -> BridgeResult<Normalized> {
    let mut book = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| BridgeError::FormatParse(format!("unreadable workbook: {e}")))?;
    let range = book
        .worksheet_range_at(0)
        .ok_or_else(|| BridgeError::FormatParse("workbook has no sheets".into()))?
        .map_err(|e| BridgeError::FormatParse(format!("unreadable sheet: {e}")))?;
    let mut lines = range.rows();
    let Some(head) = lines.next() else {
        return Ok(Normalized { columns: Some(Vec::new()), rows: Vec::new() });
    };
    let header: Vec<Option<String>> = head.iter().map(|c| text_of(&cell_value(c))).collect();
    Ok(from_grid(&header, lines.map(|r| r.iter().map(cell_value).collect::<Vec<_>>())))
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) => Value::String(ts.to_string()),
            None => Number::from_f64(dt.as_f64()).map(Value::Number).unwrap_or(Value::Null),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(_) | Data::Empty => Value::Null,
    }
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Delimited text. Cells stay strings; empty cells are `null`.
pub fn csv(bytes: &[u8]) -> BridgeResult<Normalized> {
    let text = decode_text(bytes);
    let delimiter = sniff_delimiter(&text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = Vec::new();
    for rec in reader.records() {
        let rec = rec.map_err(|e| BridgeError::FormatParse(format!("invalid csv: {e}")))?;
        records.push(rec);
    }
    let mut iter = records.into_iter();
    let Some(head) = iter.next() else {
        return Ok(Normalized { columns: Some(Vec::new()), rows: Vec::new() });
    };
    let header: Vec<Option<String>> = head.iter().map(|s| Some(s.to_string())).collect();
    let body = iter.map(|rec| {
        rec.iter()
            .map(|s| if s.trim().is_empty() { Value::Null } else { Value::String(s.to_string()) })
            .collect::<Vec<_>>()
    });
    Ok(from_grid(&header, body))
}

/// utf-8 with BOM, then plain utf-8, then latin-1 (never fails).
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Pick the candidate delimiter that appears most often in the header line.
/// Ties go to the earlier candidate; no candidate at all means `,`.
pub fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut best = (b',', 0usize);
    for d in DELIMITERS {
        let n = header.bytes().filter(|b| *b == d).count();
        if n > best.1 {
            best = (d, n);
        }
    }
    best.0
}
