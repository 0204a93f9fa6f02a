//! Live entities. Sensors read the binder's current snapshot on every call;
//! trackers are fixed at activation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use civis_core::{EntityKind, EntitySpec, FieldSelector, GeoPoint};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::binder::RowSnapshot;

/// State reported by every tracker.
pub const TRACKER_STATE: &str = "present";

/// What a host needs to expose one entity.
pub trait EntityView {
    fn unique_key(&self) -> &str;
    fn object_id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn icon(&self) -> &str;
    fn value(&self) -> Option<Value>;
    fn available(&self) -> bool;
    fn attributes(&self) -> Map<String, Value>;
}

#[derive(Clone)]
pub struct SensorEntity {
    spec: EntitySpec,
    row: usize,
    selector: FieldSelector,
    snap: Arc<ArcSwap<RowSnapshot>>,
}

impl EntityView for SensorEntity {
    fn unique_key(&self) -> &str { &self.spec.key }
    fn object_id(&self) -> &str { &self.spec.object_id }
    fn display_name(&self) -> &str { &self.spec.name }
    fn icon(&self) -> &str { &self.spec.icon }

    fn value(&self) -> Option<Value> {
        let snap = self.snap.load();
        snap.rows.get(self.row)?.resolve(&self.selector).filter(|v| !v.is_null())
    }

    fn available(&self) -> bool {
        let snap = self.snap.load();
        !snap.rows.is_empty() && self.row < snap.rows.len()
    }

    fn attributes(&self) -> Map<String, Value> {
        let snap = self.snap.load();
        snap.rows.get(self.row).map(|r| r.attributes_without(&self.selector.key)).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct TrackerEntity {
    spec: EntitySpec,
    feature_id: String,
    point: Option<GeoPoint>,
    attributes: Map<String, Value>,
}

impl TrackerEntity {
    pub fn feature_id(&self) -> &str { &self.feature_id }
    pub fn latitude(&self) -> Option<f64> { self.point.map(|p| p.latitude) }
    pub fn longitude(&self) -> Option<f64> { self.point.map(|p| p.longitude) }
}

impl EntityView for TrackerEntity {
    fn unique_key(&self) -> &str { &self.spec.key }
    fn object_id(&self) -> &str { &self.spec.object_id }
    fn display_name(&self) -> &str { &self.spec.name }
    fn icon(&self) -> &str { &self.spec.icon }
    fn value(&self) -> Option<Value> { Some(Value::String(TRACKER_STATE.to_string())) }
    fn available(&self) -> bool { true }
    fn attributes(&self) -> Map<String, Value> { self.attributes.clone() }
}

#[derive(Clone)]
pub enum Entity {
    Sensor(SensorEntity),
    Tracker(TrackerEntity),
}

impl Entity {
    pub(crate) fn from_spec(spec: EntitySpec, snap: &Arc<ArcSwap<RowSnapshot>>) -> Self {
        match spec.kind.clone() {
            EntityKind::Sensor { row, selector } => Entity::Sensor(SensorEntity { spec, row, selector, snap: Arc::clone(snap) }),
            EntityKind::Tracker { feature_id, point, attributes } => {
                Entity::Tracker(TrackerEntity { spec, feature_id, point, attributes })
            }
        }
    }

    fn view(&self) -> &dyn EntityView {
        match self {
            Entity::Sensor(s) => s,
            Entity::Tracker(t) => t,
        }
    }

    /// Point-in-time copy for display and serialization.
    pub fn state(&self) -> EntityState {
        let v = self.view();
        let (latitude, longitude) = match self {
            Entity::Tracker(t) => (t.latitude(), t.longitude()),
            Entity::Sensor(_) => (None, None),
        };
        EntityState {
            key: v.unique_key().to_string(),
            object_id: v.object_id().to_string(),
            name: v.display_name().to_string(),
            icon: v.icon().to_string(),
            value: v.value(),
            available: v.available(),
            latitude,
            longitude,
            attributes: v.attributes(),
        }
    }
}

impl EntityView for Entity {
    fn unique_key(&self) -> &str { self.view().unique_key() }
    fn object_id(&self) -> &str { self.view().object_id() }
    fn display_name(&self) -> &str { self.view().display_name() }
    fn icon(&self) -> &str { self.view().icon() }
    fn value(&self) -> Option<Value> { self.view().value() }
    fn available(&self) -> bool { self.view().available() }
    fn attributes(&self) -> Map<String, Value> { self.view().attributes() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub key: String,
    pub object_id: String,
    pub name: String,
    pub icon: String,
    pub value: Option<Value>,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    pub attributes: Map<String, Value>,
}
