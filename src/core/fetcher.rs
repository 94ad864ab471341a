//! Snapshot fetching abstraction and its failure taxonomy

use crate::core::snapshot::Snapshot;
use crate::core::variant::AccountVariant;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The remote service does not know this player. Terminal, never retried.
    #[error("Player '{player}' not found. Check the username and account type.")]
    NotFound { player: String },

    /// The remote service asked us to slow down.
    #[error("Rate limited while fetching '{player}'")]
    RateLimited { player: String },

    /// Network, service or parse failure. Retrying later may succeed.
    #[error("Failed to fetch hiscores for '{player}': {detail}")]
    Transient {
        player: String,
        status: Option<u16>,
        detail: String,
    },
}

impl FetchError {
    pub fn transient(player: &str, status: Option<u16>, detail: impl Into<String>) -> Self {
        FetchError::Transient {
            player: player.to_string(),
            status,
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }
}

#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, player: &str, variant: AccountVariant) -> Result<Snapshot, FetchError>;
}
