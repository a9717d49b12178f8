//! Inputs shared by every loader and upgrader in a chain.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use levelq_core::item::Submitter;
use levelq_core::types::Timestamp;

/// Maps a legacy login (plus the display name stored beside it) to a stable
/// identity. Returning `None` marks the entry as lost.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, login: &str, display_name: &str) -> Option<Submitter>;
}

/// Uses the login itself as the stable id. Never loses entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginResolver;

impl IdentityResolver for LoginResolver {
    fn resolve(&self, login: &str, display_name: &str) -> Option<Submitter> {
        let login = login.trim();
        if login.is_empty() {
            return None;
        }
        let display = if display_name.trim().is_empty() {
            login
        } else {
            display_name
        };
        Some(Submitter::new(login.to_lowercase(), display, login))
    }
}

/// Fixed login table, e.g. exported from the chat platform ahead of a
/// migration.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    by_login: HashMap<String, Submitter>,
}

impl StaticResolver {
    pub fn new(entries: impl IntoIterator<Item = Submitter>) -> Self {
        Self {
            by_login: entries
                .into_iter()
                .map(|s| (s.login.to_lowercase(), s))
                .collect(),
        }
    }
}

impl IdentityResolver for StaticResolver {
    fn resolve(&self, login: &str, _display_name: &str) -> Option<Submitter> {
        self.by_login.get(&login.trim().to_lowercase()).cloned()
    }
}

/// Environment for one load.
#[derive(Clone)]
pub struct LoadContext {
    /// Data directory; legacy loaders read sibling files from here.
    pub dir: PathBuf,
    /// Timestamp used for records that carry none, and for side-file names.
    pub now: Timestamp,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl LoadContext {
    pub fn new(dir: impl Into<PathBuf>, now: Timestamp, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            dir: dir.into(),
            now,
            resolver,
        }
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("dir", &self.dir)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}
