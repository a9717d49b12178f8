//! Queue document schemas and their upgrades.
//!
//! | Version | File | Shape |
//! |---|---|---|
//! | 1 | `queue.save` + `waiting.json` | array of `{code, submitter, username, current?}`; login to minutes map |
//! | 2 | `queue.json` | `{version, current, queue, waiting}` keyed by login |
//! | 3 | `queue.json` | `{version, current, queue, waiting}` keyed by stable user id |

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use levelq_core::item::Item;
use levelq_core::queue::QueueState;
use levelq_core::types::{Timestamp, UserId};
use levelq_core::wait::{WaitLedger, WaitRecord, BASE_WEIGHT};

use crate::atomic::write_json_atomic;
use crate::chain::{SchemaVersion, UpgradeHooks, Upgraded, VersionChain};
use crate::context::LoadContext;
use crate::error::PersistenceError;
use crate::layout::{lost_levels_path, LEGACY_WAITING_FILE};

pub const NEWEST_QUEUE_VERSION: u32 = 3;

/// Queue state plus wait ledger, the value the chain produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    pub state: QueueState,
    pub ledger: WaitLedger,
}

// ---------------------------------------------------------------------------
// v1
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyEntry {
    pub code: String,
    /// Display name.
    pub submitter: String,
    /// Login.
    pub username: String,
    #[serde(default)]
    pub current: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueV1 {
    pub entries: Vec<LegacyEntry>,
    /// Minutes waited, by login.
    pub waiting: BTreeMap<String, f64>,
}

fn load_v1(raw: serde_json::Value, ctx: &LoadContext) -> Result<QueueV1, String> {
    let entries: Vec<LegacyEntry> = serde_json::from_value(raw).map_err(|e| e.to_string())?;

    let waiting_path = ctx.dir.join(LEGACY_WAITING_FILE);
    let waiting = match std::fs::read_to_string(&waiting_path) {
        Ok(text) => serde_json::from_str(&text)
            .map_err(|e| format!("{}: {e}", waiting_path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => return Err(format!("{}: {e}", waiting_path.display())),
    };

    Ok(QueueV1 { entries, waiting })
}

// ---------------------------------------------------------------------------
// v2
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryV2 {
    pub code: String,
    pub submitter: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueV2 {
    pub version: u32,
    #[serde(default)]
    pub current: Option<EntryV2>,
    #[serde(default)]
    pub queue: Vec<EntryV2>,
    #[serde(default)]
    pub waiting: BTreeMap<String, WaitRecord>,
}

fn load_v2(raw: serde_json::Value, _ctx: &LoadContext) -> Result<QueueV2, String> {
    serde_json::from_value(raw).map_err(|e| e.to_string())
}

/// Collapse the per-entry `current` flag into the dedicated slot and turn
/// minutes into weights.
fn upgrade_v1(v1: QueueV1, ctx: &LoadContext) -> Result<Upgraded<QueueV2>, String> {
    let flagged: Vec<usize> = v1
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.current)
        .map(|(idx, _)| idx)
        .collect();

    let mut entries = v1.entries;
    let current = match flagged.as_slice() {
        [idx] => Some(entries.remove(*idx)),
        _ => {
            if !entries.is_empty() {
                tracing::warn!(
                    flagged = flagged.len(),
                    "Legacy queue should flag exactly one current level, ignoring flags"
                );
            }
            None
        }
    };

    let to_v2 = |e: LegacyEntry| EntryV2 {
        code: e.code,
        submitter: e.submitter,
        username: e.username,
        submitted_at: None,
    };

    let waiting = v1
        .waiting
        .into_iter()
        .map(|(login, minutes)| {
            let minutes = minutes.max(0.0);
            let record = WaitRecord {
                weight: minutes.max(BASE_WEIGHT),
                waited_minutes: minutes.floor() as u32,
                last_online: ctx.now,
            };
            (login.to_lowercase(), record)
        })
        .collect();

    Ok(Upgraded::plain(QueueV2 {
        version: 2,
        current: current.map(to_v2),
        queue: entries.into_iter().map(to_v2).collect(),
        waiting,
    }))
}

// ---------------------------------------------------------------------------
// v3
// ---------------------------------------------------------------------------

/// Newest stored form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDocument {
    pub version: u32,
    pub current: Option<Item>,
    pub queue: Vec<Item>,
    #[serde(default)]
    pub waiting: WaitLedger,
}

impl QueueDocument {
    pub fn from_parts(state: &QueueState, ledger: &WaitLedger) -> Self {
        Self {
            version: NEWEST_QUEUE_VERSION,
            current: state.current().cloned(),
            queue: state.levels().to_vec(),
            waiting: ledger.clone(),
        }
    }
}

impl From<&QueueSnapshot> for QueueDocument {
    fn from(snapshot: &QueueSnapshot) -> Self {
        Self::from_parts(&snapshot.state, &snapshot.ledger)
    }
}

impl From<QueueDocument> for QueueSnapshot {
    fn from(doc: QueueDocument) -> Self {
        Self {
            state: QueueState::from_parts(doc.queue, doc.current),
            ledger: doc.waiting,
        }
    }
}

fn load_v3(raw: serde_json::Value, _ctx: &LoadContext) -> Result<QueueSnapshot, String> {
    let doc: QueueDocument = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    Ok(doc.into())
}

/// Entries that could not be mapped to a stable identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LostLevels {
    pub levels: Vec<LostEntry>,
    pub waiting: BTreeMap<String, WaitRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LostEntry {
    #[serde(flatten)]
    pub entry: EntryV2,
    pub current: bool,
}

impl LostLevels {
    pub fn len(&self) -> usize {
        self.levels.len() + self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.waiting.is_empty()
    }
}

/// Resolve logins to stable ids. Unresolvable entries are deferred to a
/// hook that writes them to a side file.
fn upgrade_v2(v2: QueueV2, ctx: &LoadContext) -> Result<Upgraded<QueueSnapshot>, String> {
    let mut lost = LostLevels::default();

    let mut convert = |entry: EntryV2, current: bool| -> Option<Item> {
        match ctx.resolver.resolve(&entry.username, &entry.submitter) {
            Some(submitter) => {
                let at = entry.submitted_at.unwrap_or(ctx.now);
                Some(Item::new(submitter, entry.code, at))
            }
            None => {
                lost.levels.push(LostEntry { entry, current });
                None
            }
        }
    };

    let current = v2.current.and_then(|e| convert(e, true));
    let queue: Vec<Item> = v2.queue.into_iter().filter_map(|e| convert(e, false)).collect();

    let mut records: Vec<(UserId, WaitRecord)> = Vec::new();
    for (login, record) in v2.waiting {
        match ctx.resolver.resolve(&login, &login) {
            Some(submitter) => records.push((submitter.id, record)),
            None => {
                lost.waiting.insert(login, record);
            }
        }
    }

    let snapshot = QueueSnapshot {
        state: QueueState::from_parts(queue, current),
        ledger: WaitLedger::from_records(records),
    };

    let mut hooks = UpgradeHooks::new();
    if !lost.is_empty() {
        let path = lost_levels_path(&ctx.dir, ctx.now);
        hooks.push("write lost levels", move || write_lost_levels(&path, &lost));
    }
    Ok(Upgraded {
        data: snapshot,
        hooks,
    })
}

fn write_lost_levels(path: &Path, lost: &LostLevels) -> Result<(), PersistenceError> {
    write_json_atomic(path, lost)?;
    tracing::warn!(
        count = lost.len(),
        path = %path.display(),
        "Some queue entries could not be converted and were written to a side file"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

pub fn queue_chain() -> Result<VersionChain<QueueSnapshot>, PersistenceError> {
    VersionChain::new(
        "queue",
        vec![
            SchemaVersion::initial(1, load_v1).unversioned(),
            SchemaVersion::upgraded(2, load_v2, upgrade_v1),
            SchemaVersion::upgraded(3, load_v3, upgrade_v2),
        ],
    )
}
