//! Online presence boundary.
//!
//! The chat platform's participant list is reached through a
//! [`PresenceProvider`]. [`OnlinePresence`] bounds every fetch with a
//! timeout so a slow platform turns into an "unavailable" result instead of
//! a hung selection.

use std::sync::Arc;
use std::time::Duration;

use levelq_core::presence::Roster;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("Presence fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Presence provider failed: {0}")]
    Provider(String),
}

/// Source of the live roster.
#[async_trait::async_trait]
pub trait PresenceProvider: Send + Sync {
    async fn roster(&self) -> Result<Roster, PresenceError>;
}

/// Roster held in memory and replaced wholesale.
#[derive(Debug, Default)]
pub struct StaticPresence {
    roster: RwLock<Option<Roster>>,
}

impl StaticPresence {
    pub fn new(roster: Roster) -> Self {
        Self {
            roster: RwLock::new(Some(roster)),
        }
    }

    /// A provider that always fails until a roster is set.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub async fn set(&self, roster: Roster) {
        *self.roster.write().await = Some(roster);
    }

    pub async fn clear(&self) {
        *self.roster.write().await = None;
    }
}

#[async_trait::async_trait]
impl PresenceProvider for StaticPresence {
    async fn roster(&self) -> Result<Roster, PresenceError> {
        self.roster
            .read()
            .await
            .clone()
            .ok_or_else(|| PresenceError::Provider("no roster available".to_string()))
    }
}

/// Provider plus fetch timeout.
#[derive(Clone)]
pub struct OnlinePresence {
    provider: Arc<dyn PresenceProvider>,
    timeout: Duration,
}

impl OnlinePresence {
    pub fn new(provider: Arc<dyn PresenceProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn fetch(&self) -> Result<Roster, PresenceError> {
        match tokio::time::timeout(self.timeout, self.provider.roster()).await {
            Ok(result) => result,
            Err(_) => Err(PresenceError::Timeout(self.timeout)),
        }
    }
}

impl std::fmt::Debug for OnlinePresence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnlinePresence")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
