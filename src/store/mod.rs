pub mod compaction;
pub mod disk;
pub mod memory;
pub mod snapshots;

use crate::core::{AccountVariant, entity_key};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

pub use compaction::{RetentionPolicy, compact};
pub use disk::DiskPreferences;
pub use memory::MemoryPreferences;
pub use snapshots::{FlushTask, SaveOutcome, SnapshotStore, StoreOptions};

/// Small durable key/value settings. Not used for snapshot history.
pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn unset(&self, key: &str) -> Result<()>;
}

const VARIANT_KEY_PREFIX: &str = "variant/";
const LAST_SELECTED_KEY: &str = "last_selected";

/// Per-player settings whose lifecycle is independent of snapshot history.
#[derive(Clone)]
pub struct PlayerSettings {
    prefs: Arc<dyn Preferences>,
}

impl PlayerSettings {
    pub fn new(prefs: Arc<dyn Preferences>) -> Self {
        Self { prefs }
    }

    fn variant_key(player: &str) -> String {
        format!("{VARIANT_KEY_PREFIX}{}", entity_key(player))
    }

    /// Account variant for a player, `Normal` when unset or unreadable.
    pub fn variant(&self, player: &str) -> AccountVariant {
        match self.prefs.get(&Self::variant_key(player)) {
            Ok(Some(name)) => name.parse().unwrap_or_else(|_| {
                warn!(
                    "Invalid account variant '{}' for player '{}', defaulting to Normal",
                    name, player
                );
                AccountVariant::Normal
            }),
            Ok(None) => AccountVariant::Normal,
            Err(e) => {
                warn!("Failed to read account variant for '{}': {}", player, e);
                AccountVariant::Normal
            }
        }
    }

    pub fn set_variant(&self, player: &str, variant: AccountVariant) -> Result<()> {
        self.prefs
            .set(&Self::variant_key(player), variant.as_key())?;
        debug!("Saved account variant '{}' for player '{}'", variant, player);
        Ok(())
    }

    pub fn clear_variant(&self, player: &str) -> Result<()> {
        self.prefs.unset(&Self::variant_key(player))
    }

    pub fn last_selected(&self) -> Option<String> {
        self.prefs
            .get(LAST_SELECTED_KEY)
            .ok()
            .flatten()
            .filter(|name| !name.is_empty())
    }

    pub fn set_last_selected(&self, player: &str) -> Result<()> {
        self.prefs.set(LAST_SELECTED_KEY, player)
    }
}
