pub mod cli;
pub mod core;
pub mod orchestrator;
pub mod providers;
pub mod scheduler;
pub mod store;
pub mod view;

use crate::core::config::AppConfig;
use crate::core::{AccountVariant, Clock, Period, SnapshotFetcher, SystemClock};
use crate::providers::HiscoresClient;
use crate::store::{DiskPreferences, PlayerSettings, SnapshotStore, StoreOptions};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Add {
        player: String,
        variant: Option<AccountVariant>,
    },
    Remove {
        player: String,
    },
    List,
    Gains {
        player: Option<String>,
        period: Period,
        day: Option<u32>,
        refresh: bool,
    },
    Track {
        player: Option<String>,
    },
}

/// Store, fetcher and clock wired from configuration.
pub struct App {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<SnapshotStore>,
    pub fetcher: Arc<dyn SnapshotFetcher>,
}

impl App {
    pub async fn open(config: AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let preferences = DiskPreferences::open(&config.preferences_dir()?)?;
        let settings = PlayerSettings::new(Arc::new(preferences));
        let store = SnapshotStore::open(
            config.snapshot_file()?,
            settings,
            clock.clone(),
            StoreOptions::from(&config.tracking),
        )
        .await?;
        let fetcher = HiscoresClient::new(&config.providers.hiscores, clock.clone())?;

        Ok(Self {
            config,
            clock,
            store: Arc::new(store),
            fetcher: Arc::new(fetcher),
        })
    }

    /// Runs a command and returns what it wants printed.
    pub async fn execute(&self, command: AppCommand) -> Result<String> {
        match command {
            AppCommand::Add { player, variant } => cli::players::add(self, &player, variant).await,
            AppCommand::Remove { player } => cli::players::remove(self, &player),
            AppCommand::List => Ok(cli::players::list(self)),
            AppCommand::Gains {
                player,
                period,
                day,
                refresh,
            } => cli::gains::run(self, player.as_deref(), period, day, refresh).await,
            AppCommand::Track { player } => {
                cli::track::run(self, player.as_deref(), async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                    }
                })
                .await
            }
        }
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("xptrack starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::open(config, Arc::new(SystemClock)).await?;
    let result = app.execute(command).await;

    // Persist whatever the command saved, even when it failed halfway
    if let Err(e) = app.store.flush().await {
        warn!("Failed to save snapshots: {:#}", e);
    }

    let output = result?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
