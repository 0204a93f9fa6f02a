//! XML payloads: convert to a JSON tree, then locate the record list.
//!
//! Conversion rules: element local names become keys, attributes become
//! fields, repeated children become arrays, text next to attributes or
//! children is stored under `value`, and a text-only element becomes a string.

use civis_core::{BridgeError, BridgeResult, Row, SUB_ENTRY_KEYS};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::Normalized;

pub fn normalize(bytes: &[u8], records_path: Option<&str>) -> BridgeResult<Normalized> {
    let doc = to_json(bytes)?;
    let records = match records_path {
        Some(path) => {
            let found = doc
                .pointer(path)
                .ok_or_else(|| BridgeError::FormatParse(format!("no element at {path}")))?;
            match found {
                Value::Array(items) => items.clone(),
                Value::Object(_) => vec![found.clone()],
                _ => return Err(BridgeError::FormatParse(format!("{path} is not a record list"))),
            }
        }
        None => find_records(&doc),
    };
    let rows: Vec<Row> = records
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(mut fields) => {
                unwrap_graphics(&mut fields);
                Some(Row::new(fields))
            }
            _ => None,
        })
        .collect();
    let columns = rows.first().map(|r| r.fields.keys().cloned().collect());
    Ok(Normalized { columns, rows })
}

/// Parse a document into `{root_name: root_value}`.
pub fn to_json(bytes: &[u8]) -> BridgeResult<Value> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut root = Map::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let (name, attrs) = open_tag(&e)?;
                let value = parse_element(&mut reader, attrs)?;
                root.insert(name, value);
            }
            Ok(Event::Empty(e)) => {
                let (name, attrs) = open_tag(&e)?;
                root.insert(name, finish(attrs, String::new()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(parse_error(&reader, e)),
        }
        buf.clear();
    }
    if root.is_empty() {
        return Err(BridgeError::FormatParse("xml document has no root element".into()));
    }
    Ok(Value::Object(root))
}

fn parse_element(reader: &mut Reader<&[u8]>, mut map: Map<String, Value>) -> BridgeResult<Value> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let (name, attrs) = open_tag(&e)?;
                let child = parse_element(reader, attrs)?;
                insert_child(&mut map, name, child);
            }
            Ok(Event::Empty(e)) => {
                let (name, attrs) = open_tag(&e)?;
                insert_child(&mut map, name, finish(attrs, String::new()));
            }
            Ok(Event::Text(e)) => {
                let t = e.unescape().map_err(|e| BridgeError::FormatParse(format!("bad xml text: {e}")))?;
                text.push_str(t.trim());
            }
            Ok(Event::CData(e)) => text.push_str(String::from_utf8_lossy(&e.into_inner()).trim()),
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => return Err(BridgeError::FormatParse("unexpected end of xml".into())),
            Ok(_) => {}
            Err(e) => return Err(parse_error(reader, e)),
        }
        buf.clear();
    }
    Ok(finish(map, text))
}

fn finish(mut map: Map<String, Value>, text: String) -> Value {
    match (map.is_empty(), text.is_empty()) {
        (true, true) => Value::Null,
        (true, false) => Value::String(text),
        (false, false) => {
            map.insert("value".into(), Value::String(text));
            Value::Object(map)
        }
        (false, true) => Value::Object(map),
    }
}

fn open_tag(e: &BytesStart<'_>) -> BridgeResult<(String, Map<String, Value>)> {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let mut attrs = Map::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| BridgeError::FormatParse(format!("bad attribute on <{name}>: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        if key == "xmlns" || attr.key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|err| BridgeError::FormatParse(format!("bad attribute value on <{name}>: {err}")))?;
        attrs.insert(key, Value::String(value.into_owned()));
    }
    Ok((name, attrs))
}

fn insert_child(map: &mut Map<String, Value>, name: String, child: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(child),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, child]);
        }
        None => {
            map.insert(name, child);
        }
    }
}

fn parse_error(reader: &Reader<&[u8]>, e: quick_xml::Error) -> BridgeError {
    BridgeError::FormatParse(format!("xml error at byte {}: {e}", reader.buffer_position()))
}

/// Depth-first search for the deepest list of objects. Lists are not
/// searched inside and neither are sub-entry containers; the first list
/// found at the greatest depth wins. Without any list the root element
/// itself is the single record.
pub fn find_records(doc: &Value) -> Vec<Value> {
    let mut best: Option<(usize, &Vec<Value>)> = None;
    walk(doc, 0, &mut best);
    match best {
        Some((_, items)) => items.clone(),
        None => doc
            .as_object()
            .and_then(|root| root.values().next())
            .filter(|v| v.is_object())
            .map(|v| vec![v.clone()])
            .unwrap_or_default(),
    }
}

fn walk<'a>(v: &'a Value, depth: usize, best: &mut Option<(usize, &'a Vec<Value>)>) {
    match v {
        Value::Array(items) if items.iter().any(Value::is_object) => {
            if best.map_or(true, |(d, _)| depth > d) {
                *best = Some((depth, items));
            }
        }
        Value::Object(map) => {
            for (k, child) in map {
                if !SUB_ENTRY_KEYS.contains(&k.as_str()) {
                    walk(child, depth + 1, best);
                }
            }
        }
        _ => {}
    }
}

/// `<graphics><graphic/>...</graphics>` arrives as `{"graphic": [...]}` (or a
/// single object); flatten it into the list itself.
fn unwrap_graphics(fields: &mut Map<String, Value>) {
    let Some(Value::Object(wrapper)) = fields.get("graphics") else { return };
    if wrapper.len() != 1 {
        return;
    }
    let list = match wrapper.values().next() {
        Some(Value::Array(items)) => items.clone(),
        Some(obj @ Value::Object(_)) => vec![obj.clone()],
        _ => return,
    };
    fields.insert("graphics".into(), Value::Array(list));
}
