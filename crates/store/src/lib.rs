//! civis store: live state for confirmed bindings.
//!
//! Each [`PollingBinder`] holds its rows in an `ArcSwap` snapshot that a
//! refresh replaces whole, and announces every swap on a `watch` epoch
//! channel. [`BindingRegistry`] owns the binders and their polling tasks.

#![forbid(unsafe_code)]

mod binder;
pub mod entity;
mod registry;

pub use binder::{PollingBinder, RefreshOutcome, RowSnapshot};
pub use entity::{Entity, EntityState, EntityView, SensorEntity, TrackerEntity, TRACKER_STATE};
pub use registry::BindingRegistry;
