//! Consumer-side gains view.
//!
//! Fetches run on worker tasks and report back over a channel. Every
//! selection or refresh advances a generation counter, and results issued
//! under an older generation are dropped on arrival.

use crate::core::generation::Generation;
use crate::core::{Clock, FetchError, Gains, Period, Snapshot, SnapshotFetcher, compute_gains};
use crate::store::SnapshotStore;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum ViewUpdate {
    /// `gains` is `None` when the player has no snapshots at all.
    Gains { player: String, gains: Option<Gains> },
    Failed { player: String, error: FetchError },
}

#[derive(Debug)]
struct Tagged {
    generation: u64,
    update: ViewUpdate,
}

pub struct GainsView {
    store: Arc<SnapshotStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    clock: Arc<dyn Clock>,
    generation: Generation,
    selected: Mutex<Option<String>>,
    tx: mpsc::UnboundedSender<Tagged>,
    rx: mpsc::UnboundedReceiver<Tagged>,
}

impl GainsView {
    pub fn new(
        store: Arc<SnapshotStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            fetcher,
            clock,
            generation: Generation::new(),
            selected: Mutex::new(None),
            tx,
            rx,
        }
    }

    /// Makes `player` the current selection, superseding any in-flight refresh.
    pub fn select(&self, player: &str) -> u64 {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = Some(player.to_string());
        if let Err(e) = self.store.settings().set_last_selected(player) {
            warn!("Failed to remember selected player '{}': {}", player, e);
        }
        self.generation.advance()
    }

    pub fn selected(&self) -> Option<String> {
        self.selected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetches the selected player on a worker task, saves the result and
    /// posts the recomputed gains. Returns `None` with nothing selected.
    pub fn refresh(&self, period: Period) -> Option<JoinHandle<()>> {
        let player = self.selected()?;
        let generation = self.generation.advance();
        let store = self.store.clone();
        let fetcher = self.fetcher.clone();
        let clock = self.clock.clone();
        let tx = self.tx.clone();

        Some(tokio::spawn(async move {
            let variant = store.settings().variant(&player);
            let update = match fetcher.fetch(&player, variant).await {
                Ok(snapshot) => {
                    store.save(snapshot);
                    let gains = gains_for(&store, clock.as_ref(), &player, period);
                    ViewUpdate::Gains { player, gains }
                }
                Err(error) => ViewUpdate::Failed { player, error },
            };
            if tx.send(Tagged { generation, update }).is_err() {
                debug!("Gains view dropped before refresh completed");
            }
        }))
    }

    /// Next update issued under the current generation. Superseded ones are discarded.
    pub async fn next_update(&mut self) -> Option<ViewUpdate> {
        while let Some(tagged) = self.rx.recv().await {
            if self.generation.is_current(tagged.generation) {
                return Some(tagged.update);
            }
            debug!(
                "Discarding stale update (generation {} vs current {})",
                tagged.generation,
                self.generation.current()
            );
        }
        None
    }

    /// Gains of the latest snapshot over `period`, from stored data only.
    pub fn gains(&self, player: &str, period: Period) -> Option<Gains> {
        gains_for(&self.store, self.clock.as_ref(), player, period)
    }

    /// Gains made during the local day `offset` days ago.
    pub fn daily_gains(&self, player: &str, offset: u32) -> Option<Gains> {
        let start = self
            .store
            .nearest_to(player, self.clock.local_midnight(offset).timestamp_millis());
        let end = match offset {
            0 => self.store.latest(player),
            _ => self
                .store
                .nearest_to(player, self.clock.local_midnight(offset - 1).timestamp_millis()),
        }?;
        Some(compute_gains(&end, distinct_baseline(&end, start).as_ref()))
    }
}

/// A baseline that is the current snapshot itself carries no information.
fn distinct_baseline(current: &Snapshot, baseline: Option<Snapshot>) -> Option<Snapshot> {
    baseline.filter(|b| b.timestamp() != current.timestamp())
}

fn gains_for(store: &SnapshotStore, clock: &dyn Clock, player: &str, period: Period) -> Option<Gains> {
    let current = store.latest(player)?;
    let target = period.baseline_target(clock).timestamp_millis();
    let baseline = distinct_baseline(&current, store.nearest_to(player, target));
    Some(compute_gains(&current, baseline.as_ref()))
}
