use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use civis_core::{now_ts, plan_entities, BridgeError, ResourceBinding, Row};
use civis_formats::{load_rows, GeoMode, NormalizeOptions, SourceRef};
use civis_hub::ResourceFetcher;
use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::entity::Entity;

/// Rows as of one refresh. Replaced whole, never mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSnapshot {
    pub epoch: u64,
    pub rows: Vec<Row>,
    pub refreshed_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Updated { epoch: u64, rows: usize },
    /// Fetch or parse failed; the previous snapshot stays current.
    Retained(BridgeError),
    /// A refresh of the same binding was already running.
    Skipped,
}

/// Keeps one binding's rows fresh and exposes its entities.
pub struct PollingBinder {
    binding: Arc<ResourceBinding>,
    fetcher: ResourceFetcher,
    normalize: NormalizeOptions,
    snap: Arc<ArcSwap<RowSnapshot>>,
    epoch_tx: watch::Sender<u64>,
    in_flight: AtomicBool,
    entities: Vec<Entity>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

impl PollingBinder {
    /// Plan entities from the binding and seed the snapshot with the rows
    /// seen at confirmation (epoch 0).
    pub fn new(binding: ResourceBinding, fetcher: ResourceFetcher, normalize: NormalizeOptions) -> Self {
        let fetcher = fetcher.with_language(binding.language);
        let seed = RowSnapshot { epoch: 0, rows: binding.snapshot.clone(), refreshed_at: binding.created_ts };
        let snap = Arc::new(ArcSwap::from_pointee(seed));
        let (epoch_tx, _) = watch::channel(0u64);
        let entities: Vec<Entity> = plan_entities(&binding).into_iter().map(|s| Entity::from_spec(s, &snap)).collect();
        debug!(resource = %binding.resource.id, entities = entities.len(), "store: binder created");
        Self {
            binding: Arc::new(binding),
            fetcher,
            normalize,
            snap,
            epoch_tx,
            in_flight: AtomicBool::new(false),
            entities,
        }
    }

    pub fn binding(&self) -> &ResourceBinding { &self.binding }

    pub fn entities(&self) -> &[Entity] { &self.entities }

    pub fn current(&self) -> Arc<RowSnapshot> { self.snap.load_full() }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    /// Fetch and normalize the resource, then swap in the new rows. Never
    /// panics or propagates; failures keep the current snapshot.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            counter!("store_refresh_skipped_total", 1u64);
            debug!(resource = %self.binding.resource.id, "store: refresh already running");
            return RefreshOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);
        let started = Instant::now();
        let loaded = load_rows(&self.fetcher, SourceRef::from(&*self.binding), GeoMode::Strict, &self.normalize).await;
        histogram!("store_refresh_ms", started.elapsed().as_secs_f64() * 1000.0);
        match loaded {
            Ok(n) => {
                let epoch = self.snap.load().epoch.saturating_add(1);
                let rows = n.rows.len();
                self.snap.store(Arc::new(RowSnapshot { epoch, rows: n.rows, refreshed_at: now_ts() }));
                self.epoch_tx.send_replace(epoch);
                counter!("store_refresh_ok_total", 1u64);
                info!(resource = %self.binding.resource.id, epoch, rows, "store: refresh ok");
                RefreshOutcome::Updated { epoch, rows }
            }
            Err(e) => {
                counter!("store_refresh_failed_total", 1u64, "reason" => e.reason());
                warn!(resource = %self.binding.resource.id, error = %e, "store: refresh failed; keeping previous rows");
                RefreshOutcome::Retained(e)
            }
        }
    }

    /// Refresh now, then every `every`. Missed ticks are skipped.
    pub fn spawn(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                me.refresh().await;
            }
        })
    }
}
