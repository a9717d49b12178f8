//! Online presence merging.
//!
//! Selection never looks at the raw platform roster. It goes through a
//! [`PresenceSnapshot`] that merges three sources:
//!
//! - the live roster fetched from the platform ([`Roster`]),
//! - a grace window after each participant's last chat message, so people
//!   missing from a stale roster still count as online,
//! - explicit lurk overrides that force a participant offline.
//!
//! Fetching the roster is the service layer's job; everything here is pure.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::item::Item;
use crate::types::{Timestamp, UserId};

/// Default grace period after last chat activity.
pub const DEFAULT_ONLINE_GRACE_MINUTES: i64 = 5;

// ---------------------------------------------------------------------------
// Roster / snapshot
// ---------------------------------------------------------------------------

/// Participant sets as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub chatters: HashSet<UserId>,
    #[serde(default)]
    pub subscribers: HashSet<UserId>,
    #[serde(default)]
    pub moderators: HashSet<UserId>,
}

/// Which participants a selection or listing considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceFilter {
    #[default]
    Everyone,
    Subscribers,
    Moderators,
}

/// Merged view of who is online at one moment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    online: HashSet<UserId>,
    subscribers: HashSet<UserId>,
    moderators: HashSet<UserId>,
}

impl PresenceSnapshot {
    /// Build a snapshot directly from sets (used by tests and replays).
    pub fn new(
        online: impl IntoIterator<Item = UserId>,
        subscribers: impl IntoIterator<Item = UserId>,
        moderators: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            online: online.into_iter().collect(),
            subscribers: subscribers.into_iter().collect(),
            moderators: moderators.into_iter().collect(),
        }
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.online.contains(id)
    }

    pub fn is_subscriber(&self, id: &str) -> bool {
        self.subscribers.contains(id)
    }

    pub fn is_moderator(&self, id: &str) -> bool {
        self.moderators.contains(id)
    }

    /// Whether `id` passes `filter` (online status is not considered).
    pub fn admits(&self, id: &str, filter: PresenceFilter) -> bool {
        match filter {
            PresenceFilter::Everyone => true,
            PresenceFilter::Subscribers => self.is_subscriber(id),
            PresenceFilter::Moderators => self.is_moderator(id),
        }
    }

    /// Indices of `items` admitted by `filter`, split into online and
    /// offline, each in queue order.
    pub fn split_indices(&self, items: &[Item], filter: PresenceFilter) -> (Vec<usize>, Vec<usize>) {
        let mut online = Vec::new();
        let mut offline = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            let id = item.submitter.id.as_str();
            if !self.admits(id, filter) {
                continue;
            }
            if self.is_online(id) {
                online.push(idx);
            } else {
                offline.push(idx);
            }
        }
        (online, offline)
    }

    /// Cloned items admitted by `filter`, split by presence.
    pub fn partition(&self, items: &[Item], filter: PresenceFilter) -> Partition {
        let (online, offline) = self.split_indices(items, filter);
        Partition {
            online: online.into_iter().map(|i| items[i].clone()).collect(),
            offline: offline.into_iter().map(|i| items[i].clone()).collect(),
        }
    }
}

/// Pending items split by presence, each half in queue order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub online: Vec<Item>,
    pub offline: Vec<Item>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.online.len() + self.offline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty() && self.offline.is_empty()
    }

    /// Selection-eligible order: online first, then offline.
    pub fn ordered(&self) -> impl Iterator<Item = &Item> {
        self.online.iter().chain(self.offline.iter())
    }
}

// ---------------------------------------------------------------------------
// Activity tracker
// ---------------------------------------------------------------------------

/// Local presence signals: recent chat activity, statuses observed on chat
/// messages, and lurk overrides.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    grace: chrono::Duration,
    last_seen: HashMap<UserId, Timestamp>,
    subscribers: HashSet<UserId>,
    moderators: HashSet<UserId>,
    lurkers: HashSet<UserId>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new(chrono::Duration::minutes(DEFAULT_ONLINE_GRACE_MINUTES))
    }
}

impl ActivityTracker {
    pub fn new(grace: chrono::Duration) -> Self {
        Self {
            grace,
            last_seen: HashMap::new(),
            subscribers: HashSet::new(),
            moderators: HashSet::new(),
            lurkers: HashSet::new(),
        }
    }

    /// Record a chat message from `id`.
    pub fn notice(&mut self, id: &str, is_subscriber: bool, is_moderator: bool, now: Timestamp) {
        self.last_seen.insert(id.to_string(), now);
        toggle(&mut self.subscribers, id, is_subscriber);
        toggle(&mut self.moderators, id, is_moderator);
    }

    /// Force `id` offline. Returns `false` if already lurking.
    pub fn set_lurking(&mut self, id: &str) -> bool {
        self.lurkers.insert(id.to_string())
    }

    /// Lift a lurk override. Returns `false` if `id` was not lurking.
    pub fn clear_lurking(&mut self, id: &str) -> bool {
        self.lurkers.remove(id)
    }

    pub fn is_lurking(&self, id: &str) -> bool {
        self.lurkers.contains(id)
    }

    /// Whether `id` spoke within the grace window ending at `now`.
    pub fn recently_active(&self, id: &str, now: Timestamp) -> bool {
        self.last_seen
            .get(id)
            .is_some_and(|seen| now - *seen <= self.grace)
    }

    /// Forget activity older than the grace window.
    pub fn prune(&mut self, now: Timestamp) {
        let grace = self.grace;
        self.last_seen.retain(|_, seen| now - *seen <= grace);
    }

    /// Merge the roster with local signals.
    pub fn snapshot(&self, roster: &Roster, now: Timestamp) -> PresenceSnapshot {
        let recent = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now - **seen <= self.grace)
            .map(|(id, _)| id);

        let online = roster
            .chatters
            .iter()
            .chain(recent)
            .filter(|id| !self.lurkers.contains(*id))
            .cloned()
            .collect();

        PresenceSnapshot {
            online,
            subscribers: roster.subscribers.union(&self.subscribers).cloned().collect(),
            moderators: roster.moderators.union(&self.moderators).cloned().collect(),
        }
    }
}

fn toggle(set: &mut HashSet<UserId>, id: &str, present: bool) {
    if present {
        set.insert(id.to_string());
    } else {
        set.remove(id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::item::Submitter;

    fn item(id: &str) -> Item {
        Item::new(Submitter::new(id, id, id), "0B1-C2D-3F4", Utc::now())
    }

    fn roster(chatters: &[&str]) -> Roster {
        Roster {
            chatters: chatters.iter().map(|s| s.to_string()).collect(),
            ..Roster::default()
        }
    }

    #[test]
    fn roster_members_are_online() {
        let tracker = ActivityTracker::default();
        let snap = tracker.snapshot(&roster(&["a"]), Utc::now());
        assert!(snap.is_online("a"));
        assert!(!snap.is_online("b"));
    }

    #[test]
    fn recent_chatter_stays_online_within_grace() {
        let mut tracker = ActivityTracker::new(Duration::minutes(5));
        let t0 = Utc::now();
        tracker.notice("b", false, false, t0);

        assert!(tracker.snapshot(&Roster::default(), t0 + Duration::minutes(4)).is_online("b"));
        assert!(tracker.snapshot(&Roster::default(), t0 + Duration::minutes(5)).is_online("b"));
        assert!(!tracker.snapshot(&Roster::default(), t0 + Duration::minutes(6)).is_online("b"));
    }

    #[test]
    fn lurking_overrides_roster_and_activity() {
        let mut tracker = ActivityTracker::default();
        let now = Utc::now();
        tracker.notice("a", false, false, now);
        assert!(tracker.set_lurking("a"));
        assert!(!tracker.set_lurking("a"));

        assert!(!tracker.snapshot(&roster(&["a"]), now).is_online("a"));

        assert!(tracker.clear_lurking("a"));
        assert!(tracker.snapshot(&roster(&["a"]), now).is_online("a"));
    }

    #[test]
    fn statuses_merge_roster_and_chat_tags() {
        let mut tracker = ActivityTracker::default();
        let now = Utc::now();
        tracker.notice("sub", true, false, now);
        let mut r = roster(&[]);
        r.moderators.insert("mod".to_string());

        let snap = tracker.snapshot(&r, now);
        assert!(snap.is_subscriber("sub"));
        assert!(snap.is_moderator("mod"));
        assert!(snap.admits("sub", PresenceFilter::Subscribers));
        assert!(!snap.admits("sub", PresenceFilter::Moderators));
        assert!(snap.admits("anyone", PresenceFilter::Everyone));
    }

    #[test]
    fn prune_drops_stale_activity() {
        let mut tracker = ActivityTracker::new(Duration::minutes(1));
        let t0 = Utc::now();
        tracker.notice("a", false, false, t0);
        tracker.prune(t0 + Duration::minutes(2));
        assert!(!tracker.recently_active("a", t0));
    }

    #[test]
    fn partition_keeps_queue_order() {
        let items = vec![item("a"), item("b"), item("c"), item("d")];
        let snap = PresenceSnapshot::new(
            ["b".to_string(), "d".to_string()],
            Vec::new(),
            Vec::new(),
        );
        let part = snap.partition(&items, PresenceFilter::Everyone);
        let order: Vec<&str> = part.ordered().map(|i| i.submitter.id.as_str()).collect();
        assert_eq!(order, ["b", "d", "a", "c"]);
        assert_eq!(part.len(), 4);
    }

    #[test]
    fn partition_applies_filter() {
        let items = vec![item("a"), item("b")];
        let snap = PresenceSnapshot::new(Vec::new(), ["b".to_string()], Vec::new());
        let part = snap.partition(&items, PresenceFilter::Subscribers);
        assert!(part.online.is_empty());
        assert_eq!(part.offline.len(), 1);
        assert_eq!(part.offline[0].submitter.id, "b");
    }
}
