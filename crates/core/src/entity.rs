//! Entity planning: a pure function from a binding to the entities it exposes.
//!
//! Planning reads only the binding, so a binding reloaded from storage yields
//! the same keys, object ids and names it had when it was confirmed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{render_value, sanitize, FieldKind, FieldSelector, GeoPoint, ResourceBinding, ResourceFormat, Row};

pub const ICON_ROWS: &str = "mdi:database";
pub const ICON_SPREADSHEET: &str = "mdi:file-excel";
pub const ICON_TRACKER: &str = "mdi:map-marker";

const NAME_CANDIDATES: [&str; 6] = ["name", "NAME", "title", "TITLE", "description", "DESCRIPTION"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpec {
    /// Stable unique key; never changes for a given binding.
    pub key: String,
    pub object_id: String,
    pub name: String,
    pub icon: String,
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Sensor { row: usize, selector: FieldSelector },
    Tracker { feature_id: String, point: Option<GeoPoint>, attributes: Map<String, Value> },
}

/// Plan every entity of a binding. Rows missing from the snapshot and
/// measurement codes the row does not carry are skipped.
pub fn plan_entities(binding: &ResourceBinding) -> Vec<EntitySpec> {
    match binding.format {
        ResourceFormat::Wfs => plan_trackers(binding),
        _ => plan_sensors(binding),
    }
}

fn plan_sensors(binding: &ResourceBinding) -> Vec<EntitySpec> {
    let icon = if binding.format.is_spreadsheet() { ICON_SPREADSHEET } else { ICON_ROWS };
    let mut out = Vec::new();
    for idx in binding.row_indices() {
        let Some(row) = binding.snapshot.get(idx) else {
            warn!(resource = %binding.resource.id, row = idx, "entity: selected row missing from snapshot");
            continue;
        };
        let row_name = row_display_name(binding.format, row, idx);
        for selector in &binding.fields {
            let description = match selector.kind {
                FieldKind::Measurement => match row.sub_entry(&selector.key) {
                    Some(entry) => entry.description,
                    None => {
                        warn!(resource = %binding.resource.id, code = %selector.key, "entity: unknown measurement code");
                        continue;
                    }
                },
                FieldKind::Field => selector.key.clone(),
            };
            out.push(EntitySpec {
                key: format!("{}_{}_{}_{}", binding.resource.id, idx, selector.kind.as_str(), selector.key),
                object_id: format!("sensor.civis_{}_{}", sanitize(&row_name), sanitize(&description)),
                name: format!("{row_name} {description}"),
                icon: icon.to_string(),
                kind: EntityKind::Sensor { row: idx, selector: selector.clone() },
            });
        }
    }
    out
}

fn plan_trackers(binding: &ResourceBinding) -> Vec<EntitySpec> {
    binding
        .row_indices()
        .into_iter()
        .filter_map(|idx| binding.snapshot.get(idx).map(|row| (idx, row)))
        .map(|(idx, row)| {
            let meta = row.feature.clone().unwrap_or_default();
            let feature_id = meta.id.unwrap_or_else(|| format!("feature_{idx}"));
            let name = tracker_name(row, &feature_id);
            let attributes = row.fields.iter().filter(|(_, v)| !v.is_null()).map(|(k, v)| (k.clone(), v.clone())).collect();
            EntitySpec {
                key: format!("wfs_{}_{}", binding.resource.id, feature_id),
                object_id: format!("device_tracker.civis_{}", sanitize(&name)),
                name,
                icon: ICON_TRACKER.to_string(),
                kind: EntityKind::Tracker { feature_id, point: meta.point, attributes },
            }
        })
        .collect()
}

/// Display name of a row: first column for tabular formats, `name` otherwise.
pub fn row_display_name(format: ResourceFormat, row: &Row, idx: usize) -> String {
    let candidate = if format.is_tabular() {
        row.first_value().filter(|v| !v.is_null()).map(render_value).filter(|s| !s.trim().is_empty())
    } else {
        row.name()
    };
    candidate.unwrap_or_else(|| format!("row_{idx}"))
}

/// Bilingual `X_DE`/`X_IT` pairs joined as `"de - it"`, else a common name
/// property, else `"Point {id}"`.
pub fn tracker_name(row: &Row, feature_id: &str) -> String {
    let mut parts = Vec::new();
    for (key, de) in &row.fields {
        let Some(base) = key.strip_suffix("_DE") else { continue };
        if let Some(it) = row.fields.get(&format!("{base}_IT")) {
            parts.push(format!("{} - {}", render_value(de), render_value(it)));
        }
    }
    if parts.is_empty() {
        if let Some(v) = NAME_CANDIDATES.iter().find_map(|k| row.fields.get(*k)).filter(|v| !v.is_null()) {
            parts.push(render_value(v));
        }
    }
    let joined = parts.join(" - ");
    if joined.trim().is_empty() { format!("Point {feature_id}") } else { joined }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CatalogResource, FeatureMeta, Language, RowSelection};
    use serde_json::json;

    fn binding(format: ResourceFormat, rows: RowSelection, fields: Vec<FieldSelector>, snapshot: Vec<Row>) -> ResourceBinding {
        ResourceBinding {
            title: "t".into(),
            language: Language::En,
            group_id: "g".into(),
            package_id: "p".into(),
            resource: CatalogResource { id: "res".into(), name: "layer".into(), format_tag: format.as_str().into(), url: "http://x".into() },
            format,
            url: "http://x".into(),
            rows,
            fields,
            columns: None,
            snapshot,
            created_ts: 0,
        }
    }

    #[test]
    fn measurement_sensor_naming() {
        let row = Row::from_value(json!({"name": "Bolzano", "measurements": [{"code": "T", "description": "temp"}], "t": 21.4})).unwrap();
        let b = binding(ResourceFormat::Json, RowSelection::single(0), vec![FieldSelector::measurement("t")], vec![row]);
        let plan = plan_entities(&b);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, "Bolzano temp");
        assert_eq!(plan[0].key, "res_0_measurement_t");
        assert_eq!(plan[0].object_id, "sensor.civis_bolzano_temp");
        assert_eq!(plan[0].icon, ICON_ROWS);
    }

    #[test]
    fn unknown_codes_and_missing_rows_are_skipped() {
        let row = Row::from_value(json!({"name": "A", "x": 1})).unwrap();
        let b = binding(
            ResourceFormat::Json,
            RowSelection::Indices(smallvec::smallvec![0, 5]),
            vec![FieldSelector::measurement("zz"), FieldSelector::field("x")],
            vec![row],
        );
        let plan = plan_entities(&b);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, "A x");
    }

    #[test]
    fn tabular_rows_use_first_column() {
        let row = Row::from_value(json!({"Station": "Meran", "Rain": 3})).unwrap();
        let b = binding(ResourceFormat::Xlsx, RowSelection::single(0), vec![FieldSelector::field("Rain")], vec![row]);
        let plan = plan_entities(&b);
        assert_eq!(plan[0].name, "Meran Rain");
        assert_eq!(plan[0].icon, ICON_SPREADSHEET);
    }

    #[test]
    fn trackers_from_features() {
        let mut a = Row::from_value(json!({"NAME_DE": "Bozen", "NAME_IT": "Bolzano", "code": null})).unwrap();
        a.feature = Some(FeatureMeta { id: Some("f.1".into()), point: Some(GeoPoint { latitude: 46.5, longitude: 11.3 }) });
        let mut b = Row::from_value(json!({"other": 1})).unwrap();
        b.feature = Some(FeatureMeta { id: Some("f.2".into()), point: None });
        let bind = binding(ResourceFormat::Wfs, RowSelection::All, vec![], vec![a, b]);
        let plan = plan_entities(&bind);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "Bozen - Bolzano");
        assert_eq!(plan[0].key, "wfs_res_f.1");
        assert_eq!(plan[1].name, "Point f.2");
        match &plan[0].kind {
            EntityKind::Tracker { attributes, point, .. } => {
                assert!(!attributes.contains_key("code"));
                assert_eq!(point.unwrap().latitude, 46.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn planning_is_stable() {
        let row = Row::from_value(json!({"name": "X", "v": 2})).unwrap();
        let b = binding(ResourceFormat::Csv, RowSelection::single(0), vec![FieldSelector::field("v")], vec![row]);
        assert_eq!(plan_entities(&b), plan_entities(&b.clone()));
    }
}
