use super::ui;
use crate::App;
use crate::orchestrator::{FetchEvent, FetchOrchestrator, OrchestratorOptions};
use crate::scheduler::Scheduler;
use crate::store::FlushTask;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Runs a tracking session until `shutdown` resolves: stale players are
/// refreshed once per local day and snapshots are flushed periodically.
///
/// On shutdown the session is stopped, timers are cancelled and a final
/// flush gets `shutdown_flush_timeout_secs` before being abandoned.
pub async fn run(
    app: &App,
    priority: Option<&str>,
    shutdown: impl Future<Output = ()>,
) -> Result<String> {
    let tracking = &app.config.tracking;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = FetchOrchestrator::with_listener(
        app.store.clone(),
        app.fetcher.clone(),
        app.clock.clone(),
        OrchestratorOptions::from(tracking),
        tx,
    );

    let scheduler = Scheduler::new();
    scheduler.register(Arc::new(FlushTask::new(
        app.store.clone(),
        Duration::from_secs(tracking.flush_interval_secs.max(1)),
    )));

    orchestrator.start_session(priority);
    println!(
        "Tracking {} players. Press Ctrl-C to stop.",
        app.store.tracked_entities().len()
    );

    tokio::pin!(shutdown);
    let mut fetched = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = rx.recv() => match event {
                Some(FetchEvent::Fetched { player, snapshot }) => {
                    fetched += 1;
                    let total = snapshot.headline().map_or("N/A".to_string(), ui::format_number);
                    println!("Updated {player}: {total} total xp");
                }
                Some(FetchEvent::CycleFinished(report)) if report.stale > 0 => {
                    info!(
                        "Fetch cycle finished: {} updated, {} skipped",
                        report.fetched, report.skipped
                    );
                }
                Some(FetchEvent::CycleFinished(_)) => {}
                None => break,
            },
        }
    }

    orchestrator.stop_session();
    scheduler.shutdown().await?;

    let timeout = Duration::from_secs(tracking.shutdown_flush_timeout_secs);
    match tokio::time::timeout(timeout, app.store.flush()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Final flush failed: {:#}", e),
        Err(_) => warn!("Final flush did not finish within {:?}, giving up", timeout),
    }

    Ok(format!(
        "Tracking stopped. {fetched} snapshot(s) fetched this session."
    ))
}
