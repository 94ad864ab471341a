//! Once-per-day refresh of every tracked player.
//!
//! A session fetches each stale player sequentially with a pause between
//! requests, then re-scans on a fixed interval until it is stopped.

use crate::core::config::TrackingConfig;
use crate::core::snapshot::{Snapshot, Source};
use crate::core::{Clock, SnapshotFetcher};
use crate::store::SnapshotStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub inter_item_delay: Duration,
    pub rescan_interval: Duration,
}

impl From<&TrackingConfig> for OrchestratorOptions {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            inter_item_delay: Duration::from_secs(config.inter_item_delay_secs),
            rescan_interval: Duration::from_secs(config.rescan_interval_secs.max(1)),
        }
    }
}

/// Messages delivered to the registered listener.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    Fetched { player: String, snapshot: Snapshot },
    CycleFinished(CycleReport),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub stale: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Cooperative stop signal. Checked before every step; wakes pending sleeps.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration`. Returns `false` if stopped first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = self.stopped() => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

struct Session {
    stop: StopFlag,
    handle: JoinHandle<()>,
}

/// Shared by the orchestrator handle and its session task.
struct Worker {
    store: Arc<SnapshotStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    clock: Arc<dyn Clock>,
    options: OrchestratorOptions,
    listener: Option<mpsc::UnboundedSender<FetchEvent>>,
}

pub struct FetchOrchestrator {
    worker: Arc<Worker>,
    session: Mutex<Option<Session>>,
}

impl FetchOrchestrator {
    pub fn new(
        store: Arc<SnapshotStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        clock: Arc<dyn Clock>,
        options: OrchestratorOptions,
    ) -> Self {
        Self::build(store, fetcher, clock, options, None)
    }

    /// Like [`FetchOrchestrator::new`], reporting progress on `listener`.
    pub fn with_listener(
        store: Arc<SnapshotStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        clock: Arc<dyn Clock>,
        options: OrchestratorOptions,
        listener: mpsc::UnboundedSender<FetchEvent>,
    ) -> Self {
        Self::build(store, fetcher, clock, options, Some(listener))
    }

    fn build(
        store: Arc<SnapshotStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        clock: Arc<dyn Clock>,
        options: OrchestratorOptions,
        listener: Option<mpsc::UnboundedSender<FetchEvent>>,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                store,
                fetcher,
                clock,
                options,
                listener,
            }),
            session: Mutex::new(None),
        }
    }

    /// Starts (or restarts) a session: an immediate cycle with `priority`
    /// fetched first, then a rescan every `rescan_interval`.
    pub fn start_session(&self, priority: Option<&str>) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = session.take() {
            previous.stop.stop();
        }

        let stop = StopFlag::new();
        let worker = self.worker.clone();
        let priority = priority.map(str::to_string);
        let handle = tokio::spawn(worker.run_session(priority, stop.clone()));
        debug!("Tracking session started");
        *session = Some(Session { stop, handle });
    }

    /// Stops the session. An in-flight fetch completes; nothing after it starts.
    pub fn stop_session(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.stop.stop();
            debug!("Tracking session stopped");
        }
    }

    /// Stops the session and waits for its task to wind down.
    pub async fn shutdown(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.stop.stop();
            if let Err(e) = session.handle.await {
                warn!("Tracking session ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> SessionState {
        match &*self.session.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(session) if !session.handle.is_finished() => SessionState::Running,
            _ => SessionState::Idle,
        }
    }

    /// Players lacking a remote snapshot dated today, `priority` first then alphabetical.
    pub fn stale_queue(&self, priority: Option<&str>) -> Vec<String> {
        self.worker.stale_queue(priority)
    }

    /// Runs a single fetch cycle outside of any session.
    pub async fn run_cycle(&self, priority: Option<&str>) -> CycleReport {
        self.worker.run_cycle(priority, &StopFlag::new()).await
    }
}

impl Drop for FetchOrchestrator {
    fn drop(&mut self) {
        self.stop_session();
    }
}

impl Worker {
    async fn run_session(self: Arc<Self>, priority: Option<String>, stop: StopFlag) {
        // First tick fires immediately. A cycle overrunning the interval delays the next one.
        let mut ticker = tokio::time::interval(self.options.rescan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut priority = priority;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => break,
            }
            // Only the immediate cycle at session start is prioritised
            self.run_cycle(priority.take().as_deref(), &stop).await;
            if stop.is_stopped() {
                break;
            }
        }
        debug!("Tracking session task finished");
    }

    fn is_stale(&self, player: &str) -> bool {
        let today = self.clock.local_date(self.clock.now_millis());
        match self.store.latest_from(player, Source::RemoteApi) {
            Some(latest) => self.clock.local_date(latest.timestamp()) != today,
            None => true,
        }
    }

    fn stale_queue(&self, priority: Option<&str>) -> Vec<String> {
        let priority = priority.map(crate::core::entity_key);
        let mut stale: Vec<String> = self
            .store
            .tracked_entities()
            .into_iter()
            .filter(|player| self.is_stale(player))
            .collect();
        stale.sort_by_cached_key(|player| {
            let key = crate::core::entity_key(player);
            (priority.as_ref() != Some(&key), key)
        });
        stale
    }

    fn notify(&self, event: FetchEvent) {
        if let Some(listener) = &self.listener {
            if listener.send(event).is_err() {
                debug!("Fetch listener dropped");
            }
        }
    }

    async fn run_cycle(&self, priority: Option<&str>, stop: &StopFlag) -> CycleReport {
        let queue = self.stale_queue(priority);
        let mut report = CycleReport {
            stale: queue.len(),
            ..CycleReport::default()
        };
        if queue.is_empty() {
            debug!("Every tracked player already has a snapshot for today");
            self.notify(FetchEvent::CycleFinished(report));
            return report;
        }
        debug!("{} stale players, starting fetch cycle", queue.len());

        for (index, player) in queue.iter().enumerate() {
            if stop.is_stopped()
                || (index > 0 && !stop.sleep(self.options.inter_item_delay).await)
            {
                report.cancelled = true;
                break;
            }

            let variant = self.store.settings().variant(player);
            debug!("Fetching '{}' ({}/{})", player, index + 1, queue.len());
            match self.fetcher.fetch(player, variant).await {
                Ok(snapshot) => {
                    self.store.save(snapshot.clone());
                    report.fetched += 1;
                    self.notify(FetchEvent::Fetched {
                        player: player.clone(),
                        snapshot,
                    });
                }
                Err(e) if e.is_not_found() => {
                    warn!("Player '{}' not found, skipping", player);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Failed to fetch '{}': {}", player, e);
                    report.skipped += 1;
                }
            }
        }

        if report.cancelled {
            debug!("Fetch cycle cancelled after {} players", report.fetched + report.skipped);
        } else {
            info!(
                "Fetch cycle complete: updated {} of {} stale players",
                report.fetched, report.stale
            );
        }
        self.notify(FetchEvent::CycleFinished(report));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AccountVariant, FetchError, FixedClock, SnapshotBuilder};
    use crate::store::{MemoryPreferences, PlayerSettings, StoreOptions};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Records every call; answers NotFound for names in `missing`.
    struct MockFetcher {
        calls: Mutex<Vec<(String, AccountVariant)>>,
        missing: HashSet<String>,
        xp: i64,
    }

    impl MockFetcher {
        fn new(missing: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                missing: missing.iter().map(|s| s.to_string()).collect(),
                xp: 9_000,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl SnapshotFetcher for MockFetcher {
        async fn fetch(
            &self,
            player: &str,
            variant: AccountVariant,
        ) -> Result<Snapshot, FetchError> {
            self.calls.lock().unwrap().push((player.to_string(), variant));
            if self.missing.contains(player) {
                return Err(FetchError::NotFound {
                    player: player.to_string(),
                });
            }
            Ok(SnapshotBuilder::new(player, now().timestamp_millis(), Source::RemoteApi)
                .leveled("overall", 1, 2000, self.xp)
                .build())
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<SnapshotStore>,
        fetcher: Arc<MockFetcher>,
        clock: Arc<dyn Clock>,
    }

    async fn fixture(missing: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::utc(now()));
        let store = SnapshotStore::open(
            dir.path().join("snapshots.json"),
            PlayerSettings::new(Arc::new(MemoryPreferences::new())),
            clock.clone(),
            StoreOptions::default(),
        )
        .await
        .unwrap();
        Fixture {
            _dir: dir,
            store: Arc::new(store),
            fetcher: Arc::new(MockFetcher::new(missing)),
            clock,
        }
    }

    fn seed(store: &SnapshotStore, player: &str, at: DateTime<Utc>, source: Source) {
        store.save(
            SnapshotBuilder::new(player, at.timestamp_millis(), source)
                .leveled("overall", 1, 100, at.timestamp() % 100_000 + 1)
                .build(),
        );
    }

    fn options(delay_secs: u64) -> OrchestratorOptions {
        OrchestratorOptions {
            inter_item_delay: Duration::from_secs(delay_secs),
            rescan_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_stale_queue_orders_priority_first() {
        let f = fixture(&[]).await;
        let yesterday = now() - ChronoDuration::days(1);
        for player in ["charlie", "Alice", "bob", "Dave"] {
            seed(&f.store, player, yesterday, Source::RemoteApi);
        }
        // Fresh today, so not stale
        seed(&f.store, "Dave", now() - ChronoDuration::hours(1), Source::RemoteApi);

        let orchestrator =
            FetchOrchestrator::new(f.store.clone(), f.fetcher.clone(), f.clock.clone(), options(0));
        assert_eq!(orchestrator.stale_queue(None), vec!["Alice", "bob", "charlie"]);
        assert_eq!(
            orchestrator.stale_queue(Some("CHARLIE")),
            vec!["charlie", "Alice", "bob"]
        );
        // Untracked priority names are ignored
        assert_eq!(
            orchestrator.stale_queue(Some("zezima")),
            vec!["Alice", "bob", "charlie"]
        );
    }

    #[tokio::test]
    async fn test_local_observation_does_not_count_as_fresh() {
        let f = fixture(&[]).await;
        seed(&f.store, "Alice", now() - ChronoDuration::days(1), Source::RemoteApi);
        seed(&f.store, "Alice", now() - ChronoDuration::hours(1), Source::LocalObservation);

        let orchestrator =
            FetchOrchestrator::new(f.store.clone(), f.fetcher.clone(), f.clock.clone(), options(0));
        assert_eq!(orchestrator.stale_queue(None), vec!["Alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_fetches_saves_and_skips_not_found() {
        let f = fixture(&["bob"]).await;
        let yesterday = now() - ChronoDuration::days(1);
        for player in ["Alice", "bob", "Carol"] {
            seed(&f.store, player, yesterday, Source::RemoteApi);
        }
        f.store
            .settings()
            .set_variant("Carol", AccountVariant::UltimateIronman)
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = FetchOrchestrator::with_listener(
            f.store.clone(),
            f.fetcher.clone(),
            f.clock.clone(),
            options(10),
            tx,
        );

        let start = tokio::time::Instant::now();
        let report = orchestrator.run_cycle(None).await;
        assert_eq!(
            report,
            CycleReport {
                stale: 3,
                fetched: 2,
                skipped: 1,
                cancelled: false
            }
        );
        // Two pauses between three players
        assert_eq!(start.elapsed(), Duration::from_secs(20));
        assert_eq!(f.fetcher.calls(), vec!["Alice", "bob", "Carol"]);
        assert_eq!(
            f.fetcher.calls.lock().unwrap()[2].1,
            AccountVariant::UltimateIronman
        );
        assert_eq!(f.store.latest("Alice").unwrap().headline(), Some(9_000));
        assert_eq!(f.store.snapshot_count("bob"), 1);

        let mut fetched = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                FetchEvent::Fetched { player, .. } => fetched.push(player),
                FetchEvent::CycleFinished(r) => assert_eq!(r, report),
            }
        }
        assert_eq!(fetched, vec!["Alice", "Carol"]);

        // Everyone fetched today is no longer stale
        assert_eq!(orchestrator.stale_queue(None), vec!["bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_takes_effect_before_next_player() {
        let f = fixture(&[]).await;
        let yesterday = now() - ChronoDuration::days(1);
        for player in ["Alice", "bob", "Carol"] {
            seed(&f.store, player, yesterday, Source::RemoteApi);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = FetchOrchestrator::with_listener(
            f.store.clone(),
            f.fetcher.clone(),
            f.clock.clone(),
            options(10),
            tx,
        );
        orchestrator.start_session(Some("bob"));
        assert_eq!(orchestrator.state(), SessionState::Running);

        match rx.recv().await {
            Some(FetchEvent::Fetched { player, .. }) => assert_eq!(player, "bob"),
            other => panic!("unexpected event: {other:?}"),
        }
        orchestrator.stop_session();

        // Well past every remaining inter-item delay
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.fetcher.calls(), vec!["bob"]);
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_rescans_hourly_until_shutdown() {
        let f = fixture(&[]).await;
        seed(&f.store, "Alice", now() - ChronoDuration::days(1), Source::RemoteApi);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = FetchOrchestrator::with_listener(
            f.store.clone(),
            f.fetcher.clone(),
            f.clock.clone(),
            options(10),
            tx,
        );
        orchestrator.start_session(None);

        // Immediate cycle fetches Alice
        let first = loop {
            if let Some(FetchEvent::CycleFinished(report)) = rx.recv().await {
                break report;
            }
        };
        assert_eq!(first.fetched, 1);

        // The hourly rescan finds nothing stale
        tokio::time::sleep(Duration::from_secs(3601)).await;
        let second = loop {
            if let Some(FetchEvent::CycleFinished(report)) = rx.recv().await {
                break report;
            }
        };
        assert_eq!(second.stale, 0);
        assert_eq!(f.fetcher.calls(), vec!["Alice"]);

        orchestrator.shutdown().await;
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_interrupts_sleep() {
        let stop = StopFlag::new();
        let sleeper = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.sleep(Duration::from_secs(600)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.stop();
        assert!(!sleeper.await.unwrap());
        assert!(stop.is_stopped());
    }
}
