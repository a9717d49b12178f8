//! Roster read from a local JSON file on every fetch.

use std::path::PathBuf;

use levelq_core::presence::Roster;
use levelq_service::{PresenceError, PresenceProvider};

/// Reads `{"chatters": [...], "subscribers": [...], "moderators": [...]}`
/// from disk. An external process keeps the file current.
#[derive(Debug, Clone)]
pub struct RosterFile {
    path: PathBuf,
}

impl RosterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl PresenceProvider for RosterFile {
    async fn roster(&self) -> Result<Roster, PresenceError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PresenceError::Provider(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| PresenceError::Provider(format!("{}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn reads_current_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        let provider = RosterFile::new(&path);

        assert_matches!(provider.roster().await, Err(PresenceError::Provider(_)));

        std::fs::write(&path, r#"{"chatters": ["a", "b"], "moderators": ["b"]}"#).unwrap();
        let roster = provider.roster().await.unwrap();
        assert_eq!(roster.chatters.len(), 2);
        assert!(roster.moderators.contains("b"));
        assert!(roster.subscribers.is_empty());
    }
}
