use civis_core::{FeatureMeta, GeoPoint, Row};
use serde_json::{Map, Value};

use crate::Normalized;

/// One row per GeoJSON feature: its properties plus id and point.
pub fn normalize(features: &[Value]) -> Normalized {
    let rows = features
        .iter()
        .filter(|f| f.is_object())
        .map(|f| {
            let fields = f.get("properties").and_then(Value::as_object).cloned().unwrap_or_else(Map::new);
            let id = match f.get("id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            let point = f.pointer("/geometry/coordinates").and_then(first_vertex);
            Row { fields, feature: Some(FeatureMeta { id, point }) }
        })
        .collect();
    Normalized { columns: None, rows }
}

/// `[lon, lat, ...]` directly, or the first vertex of nested coordinate arrays.
fn first_vertex(coords: &Value) -> Option<GeoPoint> {
    let arr = coords.as_array()?;
    match (arr.first()?, arr.get(1)) {
        (Value::Number(lon), Some(Value::Number(lat))) => {
            Some(GeoPoint { latitude: lat.as_f64()?, longitude: lon.as_f64()? })
        }
        (nested @ Value::Array(_), _) => first_vertex(nested),
        _ => None,
    }
}
