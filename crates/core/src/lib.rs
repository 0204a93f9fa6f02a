//! civis core types: catalog model, rows, bindings, errors and naming rules.

#![forbid(unsafe_code)]

pub mod binding;
pub mod catalog;
pub mod config;
pub mod entity;
pub mod error;
pub mod format;
pub mod naming;
pub mod row;

pub use binding::{ResourceBinding, RowSelection};
pub use catalog::{CatalogGroup, CatalogPackage, CatalogResource};
pub use config::{FetchTimeouts, Settings, DEFAULT_BASE_URL};
pub use entity::{plan_entities, row_display_name, tracker_name, EntityKind, EntitySpec};
pub use error::{BridgeError, BridgeResult, EmptyReason};
pub use format::{Language, ResourceFormat};
pub use naming::sanitize;
pub use row::{render_value, FeatureMeta, FieldKind, FieldSelector, GeoPoint, Row, SubEntry, NO_DATA_SENTINEL, SUB_ENTRY_KEYS};

/// Seconds since the Unix epoch.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
