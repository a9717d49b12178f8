//! Submitters and queued items.
//!
//! An [`Item`] is immutable once created apart from its `code`, which the
//! owner or a moderator may replace through the queue store.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Timestamp, UserId};

/// Identity of a chat participant who submits levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Submitter {
    /// Stable platform id.
    pub id: UserId,
    /// Name as rendered in chat (may contain capitals or non-ASCII).
    pub display_name: String,
    /// Lower-case login name.
    pub login: String,
}

impl Submitter {
    pub fn new(
        id: impl Into<UserId>,
        display_name: impl Into<String>,
        login: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            login: login.into().to_lowercase(),
        }
    }

    /// Whether `needle` names this submitter: an exact id, a login match
    /// (case-insensitive, optional leading `@`), or a case-insensitive
    /// fragment of the display name.
    pub fn matches_fragment(&self, needle: &str) -> bool {
        let needle = needle.trim().trim_start_matches('@');
        if needle.is_empty() {
            return false;
        }
        if self.id == needle || self.login.eq_ignore_ascii_case(needle) {
            return true;
        }
        self.display_name
            .to_lowercase()
            .contains(&needle.to_lowercase())
    }
}

impl std::fmt::Display for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// A queued submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub submitter: Submitter,
    /// Canonical code as produced by the codec (or a sentinel code).
    pub code: String,
    pub submitted_at: Timestamp,
    /// Opaque payload owned by an extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<serde_json::Value>,
}

impl Item {
    pub fn new(submitter: Submitter, code: impl Into<String>, submitted_at: Timestamp) -> Self {
        Self {
            id: Uuid::now_v7(),
            submitter,
            code: code.into(),
            submitted_at,
            extension: None,
        }
    }

    /// Attach an extension payload.
    pub fn with_extension(mut self, payload: serde_json::Value) -> Self {
        self.extension = Some(payload);
        self
    }

    pub fn is_owned_by(&self, id: &str) -> bool {
        self.submitter.id == id
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code, self.submitter)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
