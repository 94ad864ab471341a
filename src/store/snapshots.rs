//! In-memory snapshot history backed by a single JSON file.

use crate::core::Clock;
use crate::core::config::{DuplicateCheck, TrackingConfig};
use crate::core::snapshot::{Snapshot, Source, entity_key};
use crate::scheduler::BackgroundTask;
use crate::store::PlayerSettings;
use crate::store::compaction::{RetentionPolicy, compact};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Hard cap per player, applied after compaction.
    pub max_snapshots: usize,
    pub duplicate_check: DuplicateCheck,
    pub retention: RetentionPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

impl From<&TrackingConfig> for StoreOptions {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            max_snapshots: config.max_snapshots.max(1),
            duplicate_check: config.duplicate_check,
            retention: RetentionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Appended,
    /// Nothing changed since the latest snapshot; history untouched.
    Duplicate,
}

#[derive(Default)]
struct StoreState {
    histories: HashMap<String, Vec<Snapshot>>,
    dirty: bool,
}

/// Owns every player's history. All reads hand out copies.
pub struct SnapshotStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    // Serializes flushes so an older payload never overwrites a newer one
    write_lock: tokio::sync::Mutex<()>,
    settings: PlayerSettings,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl SnapshotStore {
    /// Loads `path` fully into memory. A missing file starts empty; an
    /// unparseable one is moved aside to `<path>.corrupt` and also starts empty.
    pub async fn open(
        path: impl Into<PathBuf>,
        settings: PlayerSettings,
        clock: Arc<dyn Clock>,
        options: StoreOptions,
    ) -> Result<Self> {
        let path = path.into();
        let raw = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, Vec<Snapshot>>>(&bytes) {
                Ok(raw) => raw,
                Err(e) => {
                    let backup = with_suffix(&path, ".corrupt");
                    warn!(
                        "Snapshot file {} is corrupt ({}), moving it to {}",
                        path.display(),
                        e,
                        backup.display()
                    );
                    fs::rename(&path, &backup).await.with_context(|| {
                        format!("Failed to back up corrupt file: {}", path.display())
                    })?;
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read snapshot file: {}", path.display()));
            }
        };

        let store = Self {
            path,
            state: Mutex::new(StoreState::default()),
            write_lock: tokio::sync::Mutex::new(()),
            settings,
            clock,
            options,
        };
        store.load(raw);
        Ok(store)
    }

    /// Normalizes keys and runs startup compaction over every history.
    fn load(&self, raw: BTreeMap<String, Vec<Snapshot>>) {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        let mut changed = false;
        let mut loaded = 0;

        for (key, snapshots) in raw {
            let normalized = entity_key(&key);
            changed |= normalized != key;
            loaded += snapshots.len();
            state
                .histories
                .entry(normalized)
                .or_default()
                .extend(snapshots);
        }

        let mut kept = 0;
        for history in state.histories.values_mut() {
            history.sort_by_key(Snapshot::timestamp);
            *history = compact(history, now, self.clock.as_ref(), &self.options.retention);
            self.enforce_cap(history);
            kept += history.len();
        }
        state.histories.retain(|_, history| !history.is_empty());

        if changed || kept != loaded {
            debug!("Startup cleanup kept {} of {} snapshots", kept, loaded);
            state.dirty = true;
        }
        info!(
            "Loaded {} snapshots for {} players",
            kept,
            state.histories.len()
        );
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enforce_cap(&self, history: &mut Vec<Snapshot>) {
        if history.len() > self.options.max_snapshots {
            let excess = history.len() - self.options.max_snapshots;
            history.drain(..excess);
        }
    }

    fn is_duplicate(&self, latest: &Snapshot, candidate: &Snapshot) -> bool {
        match self.options.duplicate_check {
            DuplicateCheck::Headline => match (latest.headline(), candidate.headline()) {
                (Some(a), Some(b)) => a != 0 && a == b,
                _ => false,
            },
            DuplicateCheck::Full => latest.metrics() == candidate.metrics(),
        }
    }

    /// Appends `snapshot` unless it repeats the player's latest one, then
    /// compacts and caps that player's history. Never touches the disk.
    pub fn save(&self, snapshot: Snapshot) -> SaveOutcome {
        let key = snapshot.key();
        let now = self.clock.now_millis();
        let mut state = self.lock();
        let history = state.histories.entry(key.clone()).or_default();

        if let Some(latest) = history.last() {
            if self.is_duplicate(latest, &snapshot) {
                debug!("Skipping duplicate snapshot for '{}'", snapshot.entity());
                return SaveOutcome::Duplicate;
            }
        }

        let at = history.partition_point(|s| s.timestamp() <= snapshot.timestamp());
        history.insert(at, snapshot);
        *history = compact(history, now, self.clock.as_ref(), &self.options.retention);
        self.enforce_cap(history);
        debug!("Saved snapshot for '{}' ({} in history)", key, history.len());

        if history.is_empty() {
            state.histories.remove(&key);
        }
        state.dirty = true;
        SaveOutcome::Appended
    }

    pub fn latest(&self, player: &str) -> Option<Snapshot> {
        self.lock()
            .histories
            .get(&entity_key(player))
            .and_then(|history| history.last().cloned())
    }

    pub fn latest_from(&self, player: &str, source: Source) -> Option<Snapshot> {
        self.lock()
            .histories
            .get(&entity_key(player))
            .and_then(|history| history.iter().rev().find(|s| s.source() == source).cloned())
    }

    /// Snapshot closest in time to `target_millis`. On a tie the earlier one wins.
    pub fn nearest_to(&self, player: &str, target_millis: i64) -> Option<Snapshot> {
        let state = self.lock();
        let history = state.histories.get(&entity_key(player))?;
        let mut best: Option<&Snapshot> = None;
        for snapshot in history {
            let distance = (snapshot.timestamp() - target_millis).abs();
            match best {
                Some(b) if (b.timestamp() - target_millis).abs() <= distance => {}
                _ => best = Some(snapshot),
            }
        }
        best.cloned()
    }

    /// The player's full history, oldest first.
    pub fn all(&self, player: &str) -> Vec<Snapshot> {
        self.lock()
            .histories
            .get(&entity_key(player))
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot_count(&self, player: &str) -> usize {
        self.lock()
            .histories
            .get(&entity_key(player))
            .map_or(0, Vec::len)
    }

    /// Display names of every player with at least one snapshot, sorted case-insensitively.
    pub fn tracked_entities(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state
            .histories
            .values()
            .filter_map(|history| history.last().map(|s| s.entity().to_string()))
            .collect();
        names.sort_by_key(|name| entity_key(name));
        names
    }

    /// Drops the player's history and account variant. Returns whether any history existed.
    pub fn remove(&self, player: &str) -> Result<bool> {
        let existed = {
            let mut state = self.lock();
            let existed = state.histories.remove(&entity_key(player)).is_some();
            if existed {
                state.dirty = true;
            }
            existed
        };
        self.settings.clear_variant(player)?;
        debug!("Removed '{}' (had history: {})", player, existed);
        Ok(existed)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole dataset if dirty. Returns `Ok(true)` when bytes hit the disk.
    ///
    /// Serialization happens under the state lock, the write outside it. A
    /// failed write leaves the store dirty for the next attempt.
    pub async fn flush(&self) -> Result<bool> {
        let _writer = self.write_lock.lock().await;
        let bytes = {
            let mut state = self.lock();
            if !state.dirty {
                return Ok(false);
            }
            let ordered: BTreeMap<&String, &Vec<Snapshot>> = state.histories.iter().collect();
            let bytes =
                serde_json::to_vec_pretty(&ordered).context("Failed to serialize snapshots")?;
            state.dirty = false;
            bytes
        };

        if let Err(e) = self.write_atomically(&bytes).await {
            self.lock().dirty = true;
            return Err(e);
        }
        debug!("Flushed {} bytes to {}", bytes.len(), self.path.display());
        Ok(true)
    }

    async fn write_atomically(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let tmp = with_suffix(&self.path, ".tmp");
        let mut file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Periodic flush-if-dirty.
pub struct FlushTask {
    store: Arc<SnapshotStore>,
    interval: Duration,
}

impl FlushTask {
    pub fn new(store: Arc<SnapshotStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl BackgroundTask for FlushTask {
    fn name(&self) -> &'static str {
        "snapshot-flush"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self) -> Result<()> {
        match self.store.flush().await {
            Ok(true) => debug!("Periodic flush wrote snapshots"),
            Ok(false) => {}
            Err(e) => warn!("Periodic flush failed, will retry: {:#}", e),
        }
        Ok(())
    }
}
