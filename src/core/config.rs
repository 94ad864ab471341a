use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const SNAPSHOT_FILE_NAME: &str = "snapshots.json";
pub const PREFERENCES_DIR_NAME: &str = "preferences";

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HiscoresProviderConfig {
    pub base_url: String,
    pub cache_ttl_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_attempts: u32,
}

impl Default for HiscoresProviderConfig {
    fn default() -> Self {
        HiscoresProviderConfig {
            base_url: "https://services.runescape.com".to_string(),
            cache_ttl_secs: 60,
            initial_backoff_ms: 2000,
            max_attempts: 5,
        }
    }
}

impl HiscoresProviderConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub hiscores: HiscoresProviderConfig,
}

/// How `save` decides a new snapshot repeats the latest one.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateCheck {
    /// Same headline (total xp) as the latest snapshot.
    #[default]
    Headline,
    /// Identical metric set as the latest snapshot.
    Full,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TrackingConfig {
    pub inter_item_delay_secs: u64,
    pub rescan_interval_secs: u64,
    pub flush_interval_secs: u64,
    pub shutdown_flush_timeout_secs: u64,
    pub max_snapshots: usize,
    pub duplicate_check: DuplicateCheck,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            inter_item_delay_secs: 10,
            rescan_interval_secs: 60 * 60,
            flush_interval_secs: 30,
            shutdown_flush_timeout_secs: 5,
            max_snapshots: 1024,
            duplicate_check: DuplicateCheck::Headline,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub providers: ProvidersConfig,
    pub tracking: TrackingConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "xptrack", "xptrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "xptrack", "xptrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn snapshot_file(&self) -> Result<PathBuf> {
        Ok(self.default_data_path()?.join(SNAPSHOT_FILE_NAME))
    }

    pub fn preferences_dir(&self) -> Result<PathBuf> {
        Ok(self.default_data_path()?.join(PREFERENCES_DIR_NAME))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
