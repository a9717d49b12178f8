//! Queue store: the ordered pending list plus the single current item.
//!
//! Every mutating operation returns an outcome enum whose `Display` is the
//! chat-facing text. Rejections (bad code, full queue, duplicate
//! submission) leave the state untouched.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodeValidation, CodecConfig};
use crate::custom_codes::CustomCodes;
use crate::item::{Item, Submitter};
use crate::presence::{Partition, PresenceFilter, PresenceSnapshot};
use crate::types::Timestamp;

/// Default pending-list capacity.
pub const DEFAULT_MAX_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Submission rules derived from settings.
#[derive(Debug, Clone)]
pub struct QueueRules {
    /// Capacity of the pending list (the current item does not count).
    pub max_size: usize,
    /// Login allowed to hold any number of items (usually the broadcaster).
    pub unlimited_submitter: Option<String>,
    pub codec: CodecConfig,
    pub custom_codes_enabled: bool,
}

impl Default for QueueRules {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            unlimited_submitter: None,
            codec: CodecConfig::default(),
            custom_codes_enabled: false,
        }
    }
}

impl QueueRules {
    pub fn is_unlimited(&self, submitter: &Submitter) -> bool {
        self.unlimited_submitter
            .as_deref()
            .is_some_and(|login| submitter.login.eq_ignore_ascii_case(login))
    }

    /// Resolve aliases (when enabled) then run the codec.
    pub fn resolve_code(&self, raw: &str, aliases: &CustomCodes) -> CodeValidation {
        let aliased = self
            .custom_codes_enabled
            .then(|| aliases.resolve(raw))
            .flatten();
        codec::validate(aliased.unwrap_or(raw), &self.codec)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Appended; `position` is the 1-based slot in the pending list.
    Added { item: Item, position: usize },
    InvalidCode { code: String },
    QueueFull { max_size: usize },
    AlreadyQueued { submitter: Submitter },
    /// The submitter owns the current item.
    CurrentlyPlaying { submitter: Submitter },
}

impl std::fmt::Display for AddOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added { item, position } => write!(
                f,
                "{}, {} has been added to the queue at position {position}.",
                item.submitter, item.code
            ),
            Self::InvalidCode { code } => write!(f, "{code} is not a valid level code."),
            Self::QueueFull { .. } => f.write_str("Sorry, the level queue is full!"),
            Self::AlreadyQueued { submitter } => write!(
                f,
                "Sorry, {submitter}, you may only submit one level at a time."
            ),
            Self::CurrentlyPlaying { submitter } => write!(
                f,
                "Sorry, {submitter}, your level is being played right now."
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed { items: Vec<Item> },
    /// The owner tried to remove the level that is being played.
    PlayingNow { item: Item },
    NotQueued,
    QueueEmpty,
}

impl std::fmt::Display for RemoveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Removed { items } => match items.as_slice() {
                [item] => write!(f, "{} has been removed from the queue.", item),
                many => write!(f, "{} levels have been removed from the queue.", many.len()),
            },
            Self::PlayingNow { item } => write!(
                f,
                "Sorry, {}, your level is being played right now.",
                item.submitter
            ),
            Self::NotQueued => f.write_str("No matching level is in the queue."),
            Self::QueueEmpty => f.write_str("The queue is empty."),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceOutcome {
    Replaced {
        item: Item,
        previous_code: String,
        was_current: bool,
    },
    InvalidCode { code: String },
    NotQueued,
}

impl std::fmt::Display for ReplaceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replaced {
                item,
                previous_code,
                ..
            } => write!(
                f,
                "{}, your level {previous_code} has been replaced with {}.",
                item.submitter, item.code
            ),
            Self::InvalidCode { code } => write!(f, "{code} is not a valid level code."),
            Self::NotQueued => f.write_str("You were not found in the queue."),
        }
    }
}

/// Result of dismissing or punting the current item.
#[derive(Debug, Clone, PartialEq)]
pub enum CurrentOutcome {
    Dismissed { item: Item },
    Punted { item: Item },
    NothingCurrent,
}

impl std::fmt::Display for CurrentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dismissed { item } => write!(f, "Dismissed {item}."),
            Self::Punted { item } => write!(
                f,
                "Ok, adding {item} back into the queue at the end."
            ),
            Self::NothingCurrent => f.write_str("There is no level being played right now."),
        }
    }
}

/// Where a participant stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Their level is the current one.
    Playing,
    NotQueued,
    /// 1-based rank in the selection-eligible order.
    Queued(usize),
}

impl Position {
    /// Numeric form: `0` playing, `-1` absent, else the rank.
    pub fn as_number(&self) -> i64 {
        match self {
            Self::Playing => 0,
            Self::NotQueued => -1,
            Self::Queued(rank) => *rank as i64,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Playing => f.write_str("Your level is being played right now!"),
            Self::NotQueued => f.write_str("Looks like you're not in the queue."),
            Self::Queued(rank) => write!(f, "You are currently in position {rank}."),
        }
    }
}

/// Current item plus the presence-split pending list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueListing {
    pub current: Option<Item>,
    pub pending: Partition,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The pending list (append-ordered) and the current item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    levels: Vec<Item>,
    current: Option<Item>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored parts.
    pub fn from_parts(levels: Vec<Item>, current: Option<Item>) -> Self {
        Self { levels, current }
    }

    pub fn levels(&self) -> &[Item] {
        &self.levels
    }

    pub fn current(&self) -> Option<&Item> {
        self.current.as_ref()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Whether `id` has a pending item.
    pub fn has_pending(&self, id: &str) -> bool {
        self.levels.iter().any(|item| item.is_owned_by(id))
    }

    fn owns_current(&self, id: &str) -> bool {
        self.current.as_ref().is_some_and(|item| item.is_owned_by(id))
    }

    /// Submit a level.
    pub fn add(
        &mut self,
        submitter: Submitter,
        raw_code: &str,
        now: Timestamp,
        rules: &QueueRules,
        aliases: &CustomCodes,
    ) -> AddOutcome {
        let validation = rules.resolve_code(raw_code, aliases);
        if !validation.is_valid() {
            return AddOutcome::InvalidCode {
                code: validation.code,
            };
        }

        if self.levels.len() >= rules.max_size {
            return AddOutcome::QueueFull {
                max_size: rules.max_size,
            };
        }

        if !rules.is_unlimited(&submitter) {
            if self.owns_current(&submitter.id) {
                return AddOutcome::CurrentlyPlaying { submitter };
            }
            if self.has_pending(&submitter.id) {
                return AddOutcome::AlreadyQueued { submitter };
            }
        }

        let item = Item::new(submitter, validation.code, now);
        self.levels.push(item.clone());
        AddOutcome::Added {
            item,
            position: self.levels.len(),
        }
    }

    /// Owner removal: drops every pending item of `id`.
    pub fn remove(&mut self, id: &str) -> RemoveOutcome {
        if self.levels.is_empty() && self.current.is_none() {
            return RemoveOutcome::QueueEmpty;
        }
        let removed = self.drain_where(|item| item.is_owned_by(id));
        if !removed.is_empty() {
            return RemoveOutcome::Removed { items: removed };
        }
        match &self.current {
            Some(item) if item.is_owned_by(id) => RemoveOutcome::PlayingNow { item: item.clone() },
            _ => RemoveOutcome::NotQueued,
        }
    }

    /// Moderator removal by id, login, or display-name fragment. Only the
    /// pending list is touched.
    pub fn moderator_remove(&mut self, needle: &str) -> RemoveOutcome {
        if self.levels.is_empty() {
            return RemoveOutcome::QueueEmpty;
        }
        let removed = self.drain_where(|item| item.submitter.matches_fragment(needle));
        if removed.is_empty() {
            RemoveOutcome::NotQueued
        } else {
            RemoveOutcome::Removed { items: removed }
        }
    }

    fn drain_where(&mut self, mut pred: impl FnMut(&Item) -> bool) -> Vec<Item> {
        let (removed, kept): (Vec<Item>, Vec<Item>) = std::mem::take(&mut self.levels)
            .into_iter()
            .partition(|item| pred(item));
        self.levels = kept;
        removed
    }

    /// Replace the code of `id`'s most recent pending item, or of the
    /// current item when they own it and have nothing pending.
    pub fn replace(
        &mut self,
        id: &str,
        raw_code: &str,
        rules: &QueueRules,
        aliases: &CustomCodes,
    ) -> ReplaceOutcome {
        let validation = rules.resolve_code(raw_code, aliases);
        if !validation.is_valid() {
            return ReplaceOutcome::InvalidCode {
                code: validation.code,
            };
        }

        let (slot, was_current) = match self.levels.iter_mut().rev().find(|i| i.is_owned_by(id)) {
            Some(item) => (item, false),
            None => match self.current.as_mut() {
                Some(item) if item.is_owned_by(id) => (item, true),
                _ => return ReplaceOutcome::NotQueued,
            },
        };

        let previous_code = std::mem::replace(&mut slot.code, validation.code);
        ReplaceOutcome::Replaced {
            item: slot.clone(),
            previous_code,
            was_current,
        }
    }

    /// Rank of `id` in the selection-eligible order (online first). A
    /// current item shifts every rank by one.
    pub fn position_of(&self, id: &str, snapshot: &PresenceSnapshot) -> Position {
        if self.owns_current(id) {
            return Position::Playing;
        }
        let (online, offline) = snapshot.split_indices(&self.levels, PresenceFilter::Everyone);
        let offset = usize::from(self.current.is_some());
        online
            .iter()
            .chain(offline.iter())
            .position(|&idx| self.levels[idx].is_owned_by(id))
            .map_or(Position::NotQueued, |rank| Position::Queued(rank + 1 + offset))
    }

    pub fn listing(&self, snapshot: &PresenceSnapshot, filter: PresenceFilter) -> QueueListing {
        QueueListing {
            current: self.current.clone(),
            pending: snapshot.partition(&self.levels, filter),
        }
    }

    /// Move the pending item at `index` into the current slot.
    pub fn promote(&mut self, index: usize) -> Option<Item> {
        if index >= self.levels.len() {
            return None;
        }
        let item = self.levels.remove(index);
        self.current = Some(item.clone());
        Some(item)
    }

    pub fn dismiss(&mut self) -> CurrentOutcome {
        match self.current.take() {
            Some(item) => CurrentOutcome::Dismissed { item },
            None => CurrentOutcome::NothingCurrent,
        }
    }

    /// Clear the current item and append it to the tail. Capacity is not
    /// checked: the item already held a slot.
    pub fn punt(&mut self) -> CurrentOutcome {
        match self.current.take() {
            Some(item) => {
                self.levels.push(item.clone());
                CurrentOutcome::Punted { item }
            }
            None => CurrentOutcome::NothingCurrent,
        }
    }

    /// Empty both the list and the current slot. Returns the number of
    /// items dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.levels.len() + usize::from(self.current.is_some());
        self.levels.clear();
        self.current = None;
        dropped
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;
    use crate::codec::{encode, CodeKind};
    use crate::custom_codes::CustomCode;

    fn user(id: &str) -> Submitter {
        Submitter::new(id, id.to_uppercase(), id)
    }

    fn code(n: u32) -> String {
        encode(n, CodeKind::Course)
    }

    fn rules(max_size: usize) -> QueueRules {
        QueueRules {
            max_size,
            unlimited_submitter: Some("streamer".to_string()),
            ..QueueRules::default()
        }
    }

    fn add(state: &mut QueueState, id: &str, n: u32, rules: &QueueRules) -> AddOutcome {
        state.add(user(id), &code(n), Utc::now(), rules, &CustomCodes::new())
    }

    fn everyone_online(ids: &[&str]) -> PresenceSnapshot {
        PresenceSnapshot::new(ids.iter().map(|s| s.to_string()), Vec::new(), Vec::new())
    }

    // -- add ------------------------------------------------------------------

    #[test]
    fn add_appends_canonical_code() {
        let mut state = QueueState::new();
        let raw = code(10).replace('-', " ").to_lowercase();
        let outcome = state.add(user("a"), &raw, Utc::now(), &rules(5), &CustomCodes::new());
        assert_matches!(outcome, AddOutcome::Added { ref item, position: 1 } if item.code == code(10));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn capacity_example() {
        let mut state = QueueState::new();
        let r = rules(1);
        assert_matches!(add(&mut state, "a", 1, &r), AddOutcome::Added { .. });
        let full = add(&mut state, "b", 2, &r);
        assert_matches!(full, AddOutcome::QueueFull { max_size: 1 });
        assert_eq!(full.to_string(), "Sorry, the level queue is full!");
        assert_eq!(state.len(), 1);

        assert_matches!(state.remove("a"), RemoveOutcome::Removed { .. });
        assert_matches!(add(&mut state, "b", 2, &r), AddOutcome::Added { .. });
    }

    #[test]
    fn duplicate_submission_rejected_until_removed() {
        let mut state = QueueState::new();
        let r = rules(10);
        add(&mut state, "a", 1, &r);
        assert_matches!(add(&mut state, "a", 2, &r), AddOutcome::AlreadyQueued { .. });
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn owner_of_current_cannot_add() {
        let mut state = QueueState::new();
        let r = rules(10);
        add(&mut state, "a", 1, &r);
        state.promote(0);
        assert_matches!(add(&mut state, "a", 2, &r), AddOutcome::CurrentlyPlaying { .. });
    }

    #[test]
    fn unlimited_submitter_may_add_repeatedly() {
        let mut state = QueueState::new();
        let r = rules(10);
        for n in 1..=3 {
            assert_matches!(add(&mut state, "streamer", n, &r), AddOutcome::Added { .. });
        }
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn invalid_code_is_not_enqueued() {
        let mut state = QueueState::new();
        let outcome = state.add(user("a"), "nope", Utc::now(), &rules(5), &CustomCodes::new());
        assert_matches!(outcome, AddOutcome::InvalidCode { .. });
        assert!(state.is_empty());
    }

    #[test]
    fn alias_resolves_only_when_enabled() {
        let aliases = CustomCodes::from_entries([CustomCode {
            name: "kaizo".to_string(),
            code: code(55),
        }]);
        let mut state = QueueState::new();
        let mut r = rules(5);
        assert_matches!(
            state.add(user("a"), "kaizo", Utc::now(), &r, &aliases),
            AddOutcome::InvalidCode { .. }
        );
        r.custom_codes_enabled = true;
        assert_matches!(
            state.add(user("a"), "KAIZO", Utc::now(), &r, &aliases),
            AddOutcome::Added { ref item, .. } if item.code == code(55)
        );
    }

    // -- remove ---------------------------------------------------------------

    #[test]
    fn owner_cannot_remove_level_being_played() {
        let mut state = QueueState::new();
        let r = rules(5);
        add(&mut state, "a", 1, &r);
        state.promote(0);
        let outcome = state.remove("a");
        assert_matches!(outcome, RemoveOutcome::PlayingNow { .. });
        assert!(outcome.to_string().contains("being played right now"));
        assert!(state.current().is_some());
    }

    #[test]
    fn remove_unknown_is_not_queued() {
        let mut state = QueueState::new();
        add(&mut state, "a", 1, &rules(10));
        assert_eq!(state.remove("ghost"), RemoveOutcome::NotQueued);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn remove_on_empty_store() {
        let mut state = QueueState::new();
        let outcome = state.remove("a");
        assert_eq!(outcome, RemoveOutcome::QueueEmpty);
        assert_eq!(outcome.to_string(), "The queue is empty.");

        // A current item alone still counts as something to operate on.
        add(&mut state, "a", 1, &rules(10));
        state.promote(0);
        assert_matches!(state.remove("b"), RemoveOutcome::NotQueued);
    }

    #[test]
    fn moderator_remove_matches_display_fragment() {
        let mut state = QueueState::new();
        let r = rules(10);
        state.add(Submitter::new("1", "CoolKid99", "coolkid99"), &code(1), Utc::now(), &r, &CustomCodes::new());
        add(&mut state, "other", 2, &r);

        assert_matches!(state.moderator_remove("kid"), RemoveOutcome::Removed { ref items } if items.len() == 1);
        assert_eq!(state.len(), 1);
        assert_eq!(state.moderator_remove("kid"), RemoveOutcome::NotQueued);
    }

    #[test]
    fn moderator_remove_on_empty_store() {
        assert_eq!(QueueState::new().moderator_remove("x"), RemoveOutcome::QueueEmpty);
    }

    #[test]
    fn moderator_remove_drops_all_entries_of_unlimited_submitter() {
        let mut state = QueueState::new();
        let r = rules(10);
        add(&mut state, "streamer", 1, &r);
        add(&mut state, "a", 2, &r);
        add(&mut state, "streamer", 3, &r);
        assert_matches!(state.moderator_remove("streamer"), RemoveOutcome::Removed { ref items } if items.len() == 2);
        assert_eq!(state.levels()[0].submitter.id, "a");
    }

    // -- replace --------------------------------------------------------------

    #[test]
    fn replace_pending_code() {
        let mut state = QueueState::new();
        let r = rules(5);
        add(&mut state, "a", 1, &r);
        let outcome = state.replace("a", &code(2), &r, &CustomCodes::new());
        assert_matches!(
            outcome,
            ReplaceOutcome::Replaced { ref item, ref previous_code, was_current: false }
                if item.code == code(2) && *previous_code == code(1)
        );
        assert_eq!(state.levels()[0].code, code(2));
    }

    #[test]
    fn replace_current_when_nothing_pending() {
        let mut state = QueueState::new();
        let r = rules(5);
        add(&mut state, "a", 1, &r);
        state.promote(0);
        assert_matches!(
            state.replace("a", &code(3), &r, &CustomCodes::new()),
            ReplaceOutcome::Replaced { was_current: true, .. }
        );
        assert_eq!(state.current().map(|i| i.code.clone()), Some(code(3)));
    }

    #[test]
    fn replace_validates_first() {
        let mut state = QueueState::new();
        let r = rules(5);
        add(&mut state, "a", 1, &r);
        assert_matches!(
            state.replace("a", "garbage", &r, &CustomCodes::new()),
            ReplaceOutcome::InvalidCode { .. }
        );
        assert_eq!(state.levels()[0].code, code(1));
        assert_eq!(
            state.replace("b", &code(2), &r, &CustomCodes::new()),
            ReplaceOutcome::NotQueued
        );
    }

    // -- position -------------------------------------------------------------

    #[test]
    fn position_puts_online_first_and_offsets_for_current() {
        let mut state = QueueState::new();
        let r = rules(10);
        for (n, id) in ["a", "b", "c"].iter().enumerate() {
            add(&mut state, id, n as u32 + 1, &r);
        }
        let snap = everyone_online(&["c"]);
        assert_eq!(state.position_of("c", &snap), Position::Queued(1));
        assert_eq!(state.position_of("a", &snap), Position::Queued(2));
        assert_eq!(state.position_of("zzz", &snap).as_number(), -1);

        state.promote(1); // b becomes current
        assert_eq!(state.position_of("b", &snap).as_number(), 0);
        assert_eq!(state.position_of("c", &snap), Position::Queued(2));
        assert_eq!(state.position_of("a", &snap), Position::Queued(3));
    }

    // -- current slot ---------------------------------------------------------

    #[test]
    fn dismiss_and_punt() {
        let mut state = QueueState::new();
        let r = rules(10);
        add(&mut state, "a", 1, &r);
        add(&mut state, "b", 2, &r);

        assert_eq!(state.dismiss(), CurrentOutcome::NothingCurrent);
        assert_eq!(state.punt(), CurrentOutcome::NothingCurrent);

        state.promote(0);
        assert_matches!(state.punt(), CurrentOutcome::Punted { .. });
        assert!(state.current().is_none());
        let order: Vec<&str> = state.levels().iter().map(|i| i.submitter.id.as_str()).collect();
        assert_eq!(order, ["b", "a"]);

        state.promote(0);
        assert_matches!(state.dismiss(), CurrentOutcome::Dismissed { ref item } if item.submitter.id == "b");
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn clear_empties_everything() {
        let mut state = QueueState::new();
        let r = rules(10);
        add(&mut state, "a", 1, &r);
        add(&mut state, "b", 2, &r);
        state.promote(0);
        assert_eq!(state.clear(), 2);
        assert!(state.is_empty());
        assert!(state.current().is_none());
    }

    #[test]
    fn promote_out_of_range_is_none() {
        assert!(QueueState::new().promote(0).is_none());
    }
}
