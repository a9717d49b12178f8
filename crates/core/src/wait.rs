//! Wait-time ledger.
//!
//! Each participant with a pending item accrues weight while online. The
//! weighted lottery draws proportionally to that weight; a winner's record
//! is removed so their next accrual starts again from the base unit.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{Timestamp, UserId};

/// Weight given to a freshly created record.
pub const BASE_WEIGHT: f64 = 1.0;

/// Accumulated fairness weight for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitRecord {
    /// Minutes-equivalent weight (scaled by the subscriber multiplier).
    pub weight: f64,
    /// Plain minutes observed online while queued.
    #[serde(default)]
    pub waited_minutes: u32,
    pub last_online: Timestamp,
}

impl WaitRecord {
    pub fn new(now: Timestamp) -> Self {
        Self {
            weight: BASE_WEIGHT,
            waited_minutes: 0,
            last_online: now,
        }
    }
}

/// Participant whose weight should advance on a tick.
#[derive(Debug, Clone, Copy)]
pub struct TickEntry<'a> {
    pub id: &'a str,
    pub is_subscriber: bool,
}

/// Per-participant wait records. Ordered by id so persisted output is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitLedger {
    records: BTreeMap<UserId, WaitRecord>,
}

impl WaitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = (UserId, WaitRecord)>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Apply one tick. Existing records gain `subscriber_multiplier` (or 1)
    /// units; participants seen for the first time get a fresh record at the
    /// base unit. Returns the number of records touched.
    pub fn tick<'a>(
        &mut self,
        online: impl IntoIterator<Item = TickEntry<'a>>,
        subscriber_multiplier: f64,
        now: Timestamp,
    ) -> usize {
        let mut touched = 0;
        let mut seen = HashSet::new();
        for entry in online {
            // Unlimited submitters appear once per item; tick them once.
            if !seen.insert(entry.id) {
                continue;
            }
            touched += 1;
            match self.records.get_mut(entry.id) {
                Some(record) => {
                    let increment = if entry.is_subscriber {
                        subscriber_multiplier
                    } else {
                        1.0
                    };
                    record.weight += increment;
                    record.waited_minutes = record.waited_minutes.saturating_add(1);
                    record.last_online = now;
                }
                None => {
                    self.records.insert(entry.id.to_string(), WaitRecord::new(now));
                }
            }
        }
        touched
    }

    pub fn get(&self, id: &str) -> Option<&WaitRecord> {
        self.records.get(id)
    }

    pub fn weight(&self, id: &str) -> Option<f64> {
        self.records.get(id).map(|r| r.weight)
    }

    /// Drop a participant's record (on selection or removal).
    pub fn remove(&mut self, id: &str) -> Option<WaitRecord> {
        self.records.remove(id)
    }

    /// Keep only records whose owner still satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.records.retain(|id, _| keep(id));
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &WaitRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn plain(id: &str) -> TickEntry<'_> {
        TickEntry {
            id,
            is_subscriber: false,
        }
    }

    #[test]
    fn first_tick_creates_base_record() {
        let mut ledger = WaitLedger::new();
        let now = Utc::now();
        assert_eq!(ledger.tick([plain("a")], 1.0, now), 1);
        let record = ledger.get("a").expect("record");
        assert_eq!(record.weight, BASE_WEIGHT);
        assert_eq!(record.waited_minutes, 0);
        assert_eq!(record.last_online, now);
    }

    #[test]
    fn later_ticks_accrue_one_unit() {
        let mut ledger = WaitLedger::new();
        let t0 = Utc::now();
        ledger.tick([plain("a")], 2.0, t0);
        ledger.tick([plain("a")], 2.0, t0 + Duration::minutes(1));
        ledger.tick([plain("a")], 2.0, t0 + Duration::minutes(2));
        let record = ledger.get("a").expect("record");
        assert_eq!(record.weight, 3.0);
        assert_eq!(record.waited_minutes, 2);
        assert_eq!(record.last_online, t0 + Duration::minutes(2));
    }

    #[test]
    fn subscribers_accrue_at_multiplier() {
        let mut ledger = WaitLedger::new();
        let now = Utc::now();
        let sub = TickEntry {
            id: "s",
            is_subscriber: true,
        };
        ledger.tick([sub], 1.5, now);
        ledger.tick([sub], 1.5, now);
        assert_eq!(ledger.weight("s"), Some(2.5));
    }

    #[test]
    fn duplicate_entries_tick_once() {
        let mut ledger = WaitLedger::new();
        let now = Utc::now();
        ledger.tick([plain("a")], 1.0, now);
        assert_eq!(ledger.tick([plain("a"), plain("a")], 1.0, now), 1);
        assert_eq!(ledger.weight("a"), Some(2.0));
    }

    #[test]
    fn removed_record_restarts_from_base() {
        let mut ledger = WaitLedger::new();
        let now = Utc::now();
        for _ in 0..5 {
            ledger.tick([plain("a")], 1.0, now);
        }
        assert!(ledger.remove("a").is_some());
        ledger.tick([plain("a")], 1.0, now);
        assert_eq!(ledger.weight("a"), Some(BASE_WEIGHT));
    }

    #[test]
    fn retain_filters_by_id() {
        let mut ledger = WaitLedger::new();
        let now = Utc::now();
        ledger.tick([plain("a"), plain("b")], 1.0, now);
        ledger.retain(|id| id == "b");
        assert!(ledger.get("a").is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut ledger = WaitLedger::new();
        ledger.tick([plain("a")], 1.0, Utc::now());
        let json = serde_json::to_value(&ledger).expect("serialize");
        assert_eq!(json["a"]["weight"], 1.0);
    }
}
