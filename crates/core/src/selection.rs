//! Level selection policies.
//!
//! Every policy works on the pending list as seen through a
//! [`PresenceSnapshot`]: eligible items are those whose submitter passes the
//! policy's filter, and online submitters always take precedence over
//! offline ones. A successful selection promotes the chosen item to current
//! and drops its submitter's wait record.

use rand::Rng;

use crate::item::Item;
use crate::presence::{PresenceFilter, PresenceSnapshot};
use crate::queue::QueueState;
use crate::wait::WaitLedger;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// A named selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Next,
    SubNext,
    ModNext,
    Random,
    SubRandom,
    ModRandom,
    WeightedRandom,
    WeightedSubRandom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Sequential,
    Uniform,
    Weighted,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::SubNext => "subnext",
            Self::ModNext => "modnext",
            Self::Random => "random",
            Self::SubRandom => "subrandom",
            Self::ModRandom => "modrandom",
            Self::WeightedRandom => "weightedrandom",
            Self::WeightedSubRandom => "weightedsubrandom",
        }
    }

    /// Parse a policy name. Returns `None` for unknown values.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next" => Some(Self::Next),
            "subnext" => Some(Self::SubNext),
            "modnext" => Some(Self::ModNext),
            "random" => Some(Self::Random),
            "subrandom" => Some(Self::SubRandom),
            "modrandom" => Some(Self::ModRandom),
            "weightedrandom" => Some(Self::WeightedRandom),
            "weightedsubrandom" => Some(Self::WeightedSubRandom),
            _ => None,
        }
    }

    /// All valid policy names.
    pub const ALL: &'static [&'static str] = &[
        "next",
        "subnext",
        "modnext",
        "random",
        "subrandom",
        "modrandom",
        "weightedrandom",
        "weightedsubrandom",
    ];

    pub fn filter(&self) -> PresenceFilter {
        match self {
            Self::SubNext | Self::SubRandom | Self::WeightedSubRandom => PresenceFilter::Subscribers,
            Self::ModNext | Self::ModRandom => PresenceFilter::Moderators,
            Self::Next | Self::Random | Self::WeightedRandom => PresenceFilter::Everyone,
        }
    }

    fn strategy(&self) -> Strategy {
        match self {
            Self::Next | Self::SubNext | Self::ModNext => Strategy::Sequential,
            Self::Random | Self::SubRandom | Self::ModRandom => Strategy::Uniform,
            Self::WeightedRandom | Self::WeightedSubRandom => Strategy::Weighted,
        }
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Cycling
// ---------------------------------------------------------------------------

/// Round-robin over a configured list of policies.
#[derive(Debug, Clone)]
pub struct SelectionCycle {
    policies: Vec<SelectionPolicy>,
    cursor: usize,
}

impl Default for SelectionCycle {
    fn default() -> Self {
        Self {
            policies: vec![SelectionPolicy::Next],
            cursor: 0,
        }
    }
}

impl SelectionCycle {
    /// Build from configured names. Unknown names become [`SelectionPolicy::Next`].
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let policies: Vec<SelectionPolicy> = names
            .iter()
            .map(|name| {
                SelectionPolicy::from_str(name.as_ref()).unwrap_or_else(|| {
                    tracing::warn!(
                        policy = name.as_ref(),
                        "Unknown selection policy, falling back to next"
                    );
                    SelectionPolicy::Next
                })
            })
            .collect();
        if policies.is_empty() {
            return Self::default();
        }
        Self {
            policies,
            cursor: 0,
        }
    }

    /// Policy for this invocation; advances and wraps the cursor.
    pub fn advance(&mut self) -> SelectionPolicy {
        let policy = self.policies[self.cursor % self.policies.len()];
        self.cursor = (self.cursor + 1) % self.policies.len();
        policy
    }

    pub fn policies(&self) -> &[SelectionPolicy] {
        &self.policies
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Selected {
        item: Item,
        policy: SelectionPolicy,
        /// Whether the submitter was online when chosen.
        online: bool,
    },
    Empty,
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selected { item, online, .. } => {
                write!(f, "Now playing {} submitted by {}.", item.code, item.submitter)?;
                if !online {
                    f.write_str(" (offline)")?;
                }
                Ok(())
            }
            Self::Empty => f.write_str("The queue is empty."),
        }
    }
}

/// Apply `policy` and promote the chosen item.
pub fn select<R: Rng>(
    state: &mut QueueState,
    ledger: &mut WaitLedger,
    snapshot: &PresenceSnapshot,
    policy: SelectionPolicy,
    rng: &mut R,
) -> Selection {
    let filter = policy.filter();
    let (online, offline) = snapshot.split_indices(state.levels(), filter);

    let choice = match policy.strategy() {
        Strategy::Sequential => online.first().or(offline.first()).copied(),
        Strategy::Uniform => pick_uniform(&online, &offline, rng),
        Strategy::Weighted => {
            let candidates = weighted_candidates(state.levels(), ledger, &online);
            let weights: Vec<f64> = candidates.iter().map(|(_, w)| *w).collect();
            match draw_weighted(&weights, rng) {
                Some(winner) => Some(candidates[winner].0),
                None => pick_uniform(&online, &offline, rng),
            }
        }
    };

    let Some(index) = choice else {
        return Selection::Empty;
    };
    let was_online = online.contains(&index);
    let Some(item) = state.promote(index) else {
        return Selection::Empty;
    };
    ledger.remove(&item.submitter.id);

    Selection::Selected {
        item,
        policy,
        online: was_online,
    }
}

/// Probability that `id` wins the next weighted draw under `filter`, without
/// touching the ledger. `None` when `id` is not a candidate.
pub fn weighted_chance(
    state: &QueueState,
    ledger: &WaitLedger,
    snapshot: &PresenceSnapshot,
    id: &str,
    filter: PresenceFilter,
) -> Option<f64> {
    let (online, _) = snapshot.split_indices(state.levels(), filter);
    let candidates = weighted_candidates(state.levels(), ledger, &online);
    let total: f64 = candidates.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    candidates
        .iter()
        .find(|(idx, _)| state.levels()[*idx].is_owned_by(id))
        .map(|(_, weight)| weight / total)
}

/// Index of the first participant whose cumulative weight exceeds `draw`.
/// `draw` is expected in `[0, total)`; larger draws resolve to the last
/// positive weight.
pub fn weighted_pick(weights: &[f64], draw: f64) -> Option<usize> {
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (idx, weight) in weights.iter().enumerate() {
        if *weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = Some(idx);
        if cumulative > draw {
            return Some(idx);
        }
    }
    last_positive
}

/// One uniform draw in `[0, total)` inverted through [`weighted_pick`].
pub fn draw_weighted<R: Rng>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return None;
    }
    weighted_pick(weights, rng.random_range(0.0..total))
}

/// One entry per online participant holding a wait record: the index of
/// their earliest pending item and their weight, in queue order.
fn weighted_candidates(items: &[Item], ledger: &WaitLedger, online: &[usize]) -> Vec<(usize, f64)> {
    let mut seen = std::collections::HashSet::new();
    online
        .iter()
        .filter_map(|&idx| {
            let id = items[idx].submitter.id.as_str();
            if !seen.insert(id) {
                return None;
            }
            ledger.weight(id).map(|weight| (idx, weight))
        })
        .collect()
}

fn pick_uniform<R: Rng>(online: &[usize], offline: &[usize], rng: &mut R) -> Option<usize> {
    let pool = if online.is_empty() { offline } else { online };
    if pool.is_empty() {
        return None;
    }
    Some(pool[rng.random_range(0..pool.len())])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
