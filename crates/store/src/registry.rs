use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use civis_core::{ResourceBinding, ResourceFormat, Settings};
use civis_formats::NormalizeOptions;
use civis_hub::ResourceFetcher;
use metrics::gauge;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::info;

use crate::binder::PollingBinder;
use crate::entity::Entity;

struct Active {
    binder: Arc<PollingBinder>,
    task: JoinHandle<()>,
}

/// Entry id to running binder. Each binder polls on its own task.
pub struct BindingRegistry {
    fetcher: ResourceFetcher,
    normalize: NormalizeOptions,
    scan_interval: Duration,
    spreadsheet_scan_interval: Duration,
    active: Mutex<FxHashMap<String, Active>>,
}

impl BindingRegistry {
    pub fn new(fetcher: ResourceFetcher, settings: &Settings) -> Self {
        Self {
            fetcher,
            normalize: NormalizeOptions::from_settings(settings),
            scan_interval: settings.scan_interval,
            spreadsheet_scan_interval: settings.spreadsheet_scan_interval,
            active: Mutex::new(FxHashMap::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, Active>> { self.active.lock().unwrap_or_else(PoisonError::into_inner) }

    fn interval_for(&self, format: ResourceFormat) -> Duration {
        if format.is_spreadsheet() { self.spreadsheet_scan_interval } else { self.scan_interval }
    }

    /// Start polling `binding` under `entry_id`, replacing any binder already
    /// running there. The first refresh runs immediately. Needs a tokio runtime.
    pub fn activate(&self, entry_id: &str, binding: ResourceBinding) -> Arc<PollingBinder> {
        let every = self.interval_for(binding.format);
        let binder = Arc::new(PollingBinder::new(binding, self.fetcher.clone(), self.normalize.clone()));
        let task = binder.spawn(every);
        info!(entry = entry_id, entities = binder.entities().len(), every_s = every.as_secs(), "store: binding activated");
        let mut active = self.lock();
        if let Some(old) = active.insert(entry_id.to_string(), Active { binder: Arc::clone(&binder), task }) {
            old.task.abort();
        }
        gauge!("store_active_bindings", active.len() as f64);
        binder
    }

    /// Stop polling and drop the entities. Returns whether anything was active.
    pub fn deactivate(&self, entry_id: &str) -> bool {
        let mut active = self.lock();
        let removed = active.remove(entry_id);
        gauge!("store_active_bindings", active.len() as f64);
        match removed {
            Some(a) => {
                a.task.abort();
                info!(entry = entry_id, "store: binding deactivated");
                true
            }
            None => false,
        }
    }

    /// Replace the binding behind `entry_id` (deactivate, then activate).
    pub fn reload(&self, entry_id: &str, binding: ResourceBinding) -> Arc<PollingBinder> {
        self.deactivate(entry_id);
        self.activate(entry_id, binding)
    }

    pub fn binder(&self, entry_id: &str) -> Option<Arc<PollingBinder>> {
        self.lock().get(entry_id).map(|a| Arc::clone(&a.binder))
    }

    pub fn entities(&self, entry_id: &str) -> Vec<Entity> {
        self.binder(entry_id).map(|b| b.entities().to_vec()).unwrap_or_default()
    }

    pub fn entry_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for BindingRegistry {
    fn drop(&mut self) {
        for (_, a) in self.lock().drain() {
            a.task.abort();
        }
    }
}
