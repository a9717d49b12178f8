//! The queue service.
//!
//! One [`QueueService`] instance owns the queue, the wait ledger, the
//! selection cycle, the alias table, the level timer, and local presence
//! signals. All of it lives behind a single async mutex that every
//! operation holds from start to finish, including while awaiting the
//! presence fetch. Two selections therefore never interleave between
//! reading eligibility and promoting an item.
//!
//! After each mutation the new state is handed to the [`Persister`].

use std::sync::Arc;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;

use levelq_core::custom_codes::{CustomCode, CustomCodes};
use levelq_core::item::Submitter;
use levelq_core::presence::{ActivityTracker, PresenceFilter, PresenceSnapshot};
use levelq_core::queue::{
    AddOutcome, CurrentOutcome, Position, QueueListing, QueueRules, QueueState, RemoveOutcome,
    ReplaceOutcome,
};
use levelq_core::selection::{self, Selection, SelectionCycle, SelectionPolicy};
use levelq_core::timer::{Clock, LevelTimer, SystemClock};
use levelq_core::wait::{TickEntry, WaitLedger, WaitRecord};
use levelq_core::{CoreError, Settings};
use levelq_persistence::{Hydrated, Persister, QueueSnapshot};

use crate::presence::OnlinePresence;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings the service consults at runtime.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub rules: QueueRules,
    pub selection: SelectionCycle,
    pub level_timeout: Option<Duration>,
    pub subscriber_multiplier: f64,
    pub online_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ServiceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rules: settings.queue_rules(),
            selection: settings.selection_cycle(),
            level_timeout: settings.level_timeout(),
            subscriber_multiplier: settings.subscriber_weight_multiplier,
            online_grace: settings.online_grace(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of an operation that needs the online roster.
#[derive(Debug, Clone, PartialEq)]
pub enum Availability<T> {
    Ready(T),
    /// The roster could not be fetched; nothing was changed.
    Unavailable,
}

impl<T> Availability<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl<T: std::fmt::Display> std::fmt::Display for Availability<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(value) => value.fmt(f),
            Self::Unavailable => {
                f.write_str("Sorry, the online list is unavailable right now. Please try again.")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

struct Inner {
    state: QueueState,
    ledger: WaitLedger,
    cycle: SelectionCycle,
    aliases: CustomCodes,
    timer: LevelTimer,
    activity: ActivityTracker,
    rng: StdRng,
}

pub struct QueueService {
    inner: Mutex<Inner>,
    config: ServiceConfig,
    presence: OnlinePresence,
    persister: Persister,
    clock: Arc<dyn Clock>,
}

impl QueueService {
    pub fn new(
        config: ServiceConfig,
        hydrated: Hydrated,
        presence: OnlinePresence,
        persister: Persister,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let inner = Inner {
            state: hydrated.queue.state,
            ledger: hydrated.queue.ledger,
            cycle: config.selection.clone(),
            aliases: hydrated.custom_codes,
            timer: LevelTimer::new(clock.clone()),
            activity: ActivityTracker::new(config.online_grace),
            rng: StdRng::from_os_rng(),
        };
        Self {
            inner: Mutex::new(inner),
            config,
            presence,
            persister,
            clock,
        }
    }

    /// Replace the time source (for the timer and activity windows).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.inner.get_mut().timer = LevelTimer::new(clock.clone());
        self.clock = clock;
        self
    }

    /// Replace the random source used by random policies.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.inner.get_mut().rng = rng;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Copy of the persisted state.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        QueueSnapshot {
            state: inner.state.clone(),
            ledger: inner.ledger.clone(),
        }
    }

    // -- submissions ---------------------------------------------------------

    pub async fn add(&self, submitter: Submitter, raw_code: &str) -> AddOutcome {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        let Inner { state, aliases, .. } = &mut *inner;
        let outcome = state.add(submitter, raw_code, now, &self.config.rules, aliases);
        if let AddOutcome::Added { item, position } = &outcome {
            tracing::info!(
                submitter = %item.submitter.id,
                code = %item.code,
                position,
                "Level added"
            );
            self.persist_queue(&inner);
        }
        outcome
    }

    /// Owner removal of all their pending items.
    pub async fn remove(&self, id: &str) -> RemoveOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = inner.state.remove(id);
        if let RemoveOutcome::Removed { items } = &outcome {
            Self::forget_idle(&mut inner, items.iter().map(|i| i.submitter.id.as_str()));
            self.persist_queue(&inner);
        }
        outcome
    }

    /// Moderator removal by id, login, or name fragment.
    pub async fn moderator_remove(&self, needle: &str) -> RemoveOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = inner.state.moderator_remove(needle);
        if let RemoveOutcome::Removed { items } = &outcome {
            tracing::info!(needle, removed = items.len(), "Levels removed by moderator");
            Self::forget_idle(&mut inner, items.iter().map(|i| i.submitter.id.as_str()));
            self.persist_queue(&inner);
        }
        outcome
    }

    pub async fn replace(&self, id: &str, raw_code: &str) -> ReplaceOutcome {
        let mut inner = self.inner.lock().await;
        let Inner { state, aliases, .. } = &mut *inner;
        let outcome = state.replace(id, raw_code, &self.config.rules, aliases);
        if matches!(outcome, ReplaceOutcome::Replaced { .. }) {
            self.persist_queue(&inner);
        }
        outcome
    }

    // -- presence-dependent reads ------------------------------------------

    pub async fn position(&self, id: &str) -> Availability<Position> {
        let inner = self.inner.lock().await;
        match self.presence_snapshot(&inner).await {
            Some(snapshot) => Availability::Ready(inner.state.position_of(id, &snapshot)),
            None => Availability::Unavailable,
        }
    }

    pub async fn list(&self, filter: PresenceFilter) -> Availability<QueueListing> {
        let inner = self.inner.lock().await;
        match self.presence_snapshot(&inner).await {
            Some(snapshot) => Availability::Ready(inner.state.listing(&snapshot, filter)),
            None => Availability::Unavailable,
        }
    }

    /// Chance that `id` wins the next weighted draw. Read-only.
    pub async fn weighted_chance(&self, id: &str, filter: PresenceFilter) -> Availability<Option<f64>> {
        let inner = self.inner.lock().await;
        match self.presence_snapshot(&inner).await {
            Some(snapshot) => Availability::Ready(selection::weighted_chance(
                &inner.state,
                &inner.ledger,
                &snapshot,
                id,
                filter,
            )),
            None => Availability::Unavailable,
        }
    }

    pub async fn wait_record(&self, id: &str) -> Option<WaitRecord> {
        self.inner.lock().await.ledger.get(id).cloned()
    }

    // -- selection -----------------------------------------------------------

    /// Apply `policy`. The presence fetch and the promotion happen under the
    /// same lock.
    pub async fn select(&self, policy: SelectionPolicy) -> Availability<Selection> {
        let mut inner = self.inner.lock().await;
        let Some(snapshot) = self.presence_snapshot(&inner).await else {
            return Availability::Unavailable;
        };
        Availability::Ready(self.select_locked(&mut inner, &snapshot, policy))
    }

    /// Apply the next policy from the configured cycle.
    pub async fn select_next(&self) -> Availability<Selection> {
        let mut inner = self.inner.lock().await;
        let Some(snapshot) = self.presence_snapshot(&inner).await else {
            return Availability::Unavailable;
        };
        let policy = inner.cycle.advance();
        Availability::Ready(self.select_locked(&mut inner, &snapshot, policy))
    }

    fn select_locked(
        &self,
        inner: &mut Inner,
        snapshot: &PresenceSnapshot,
        policy: SelectionPolicy,
    ) -> Selection {
        let Inner {
            state, ledger, rng, ..
        } = &mut *inner;
        let result = selection::select(state, ledger, snapshot, policy, rng);
        if let Selection::Selected { item, online, .. } = &result {
            tracing::info!(
                policy = %policy,
                submitter = %item.submitter.id,
                code = %item.code,
                online,
                "Level selected"
            );
            if let Some(timeout) = self.config.level_timeout {
                inner.timer.start(timeout);
            }
            self.persist_queue(inner);
        }
        result
    }

    // -- current item --------------------------------------------------------

    pub async fn dismiss(&self) -> CurrentOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = inner.state.dismiss();
        if matches!(outcome, CurrentOutcome::Dismissed { .. }) {
            inner.timer.stop();
            self.persist_queue(&inner);
        }
        outcome
    }

    pub async fn punt(&self) -> CurrentOutcome {
        let mut inner = self.inner.lock().await;
        let outcome = inner.state.punt();
        if matches!(outcome, CurrentOutcome::Punted { .. }) {
            inner.timer.stop();
            self.persist_queue(&inner);
        }
        outcome
    }

    /// Drop every item and every wait record.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let dropped = inner.state.clear();
        inner.ledger.clear();
        inner.timer.stop();
        tracing::info!(dropped, "Queue cleared");
        self.persist_queue(&inner);
        dropped
    }

    // -- presence signals ----------------------------------------------------

    pub async fn notice_chatter(&self, id: &str, is_subscriber: bool, is_moderator: bool) {
        let now = self.clock.now();
        self.inner
            .lock()
            .await
            .activity
            .notice(id, is_subscriber, is_moderator, now);
    }

    /// Force `id` offline. Returns `false` if already lurking.
    pub async fn lurk(&self, id: &str) -> bool {
        self.inner.lock().await.activity.set_lurking(id)
    }

    /// Returns `false` if `id` was not lurking.
    pub async fn unlurk(&self, id: &str) -> bool {
        self.inner.lock().await.activity.clear_lurking(id)
    }

    // -- wait ledger ---------------------------------------------------------

    /// Advance weights of every online participant with a pending item. The
    /// tick is computed on a copy of the ledger and swapped in whole.
    pub async fn tick(&self) -> Availability<usize> {
        let mut inner = self.inner.lock().await;
        let Some(snapshot) = self.presence_snapshot(&inner).await else {
            return Availability::Unavailable;
        };
        let now = self.clock.now();

        let entries: Vec<TickEntry<'_>> = inner
            .state
            .levels()
            .iter()
            .filter(|item| snapshot.is_online(&item.submitter.id))
            .map(|item| TickEntry {
                id: item.submitter.id.as_str(),
                is_subscriber: snapshot.is_subscriber(&item.submitter.id),
            })
            .collect();

        let mut next = inner.ledger.clone();
        let touched = next.tick(entries, self.config.subscriber_multiplier, now);
        inner.ledger = next;
        inner.activity.prune(now);

        tracing::debug!(touched, "Wait tick applied");
        if touched > 0 {
            self.persist_queue(&inner);
        }
        Availability::Ready(touched)
    }

    // -- aliases -------------------------------------------------------------

    pub async fn add_alias(&self, name: &str, raw_code: &str) -> Result<CustomCode, CoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .aliases
            .add(name, raw_code, &self.config.rules.codec)?
            .clone();
        self.persist_aliases(&inner);
        Ok(entry)
    }

    pub async fn remove_alias(&self, name: &str) -> Option<CustomCode> {
        let mut inner = self.inner.lock().await;
        let removed = inner.aliases.remove(name);
        if removed.is_some() {
            self.persist_aliases(&inner);
        }
        removed
    }

    pub async fn aliases(&self) -> Vec<CustomCode> {
        self.inner.lock().await.aliases.entries().cloned().collect()
    }

    // -- level timer ---------------------------------------------------------

    pub async fn timer_remaining(&self) -> Option<Duration> {
        self.inner.lock().await.timer.remaining()
    }

    pub async fn timer_expired(&self) -> bool {
        self.inner.lock().await.timer.is_expired()
    }

    pub async fn pause_timer(&self) -> bool {
        self.inner.lock().await.timer.pause()
    }

    pub async fn resume_timer(&self) -> bool {
        self.inner.lock().await.timer.resume()
    }

    pub async fn restart_timer(&self) -> bool {
        self.inner.lock().await.timer.restart()
    }

    // -- internals -----------------------------------------------------------

    async fn presence_snapshot(&self, inner: &Inner) -> Option<PresenceSnapshot> {
        match self.presence.fetch().await {
            Ok(roster) => Some(inner.activity.snapshot(&roster, self.clock.now())),
            Err(e) => {
                tracing::warn!(error = %e, "Presence unavailable");
                None
            }
        }
    }

    /// Drop wait records of participants that no longer have a pending item.
    fn forget_idle<'a>(inner: &mut Inner, ids: impl Iterator<Item = &'a str>) {
        for id in ids {
            if !inner.state.has_pending(id) {
                inner.ledger.remove(id);
            }
        }
    }

    fn persist_queue(&self, inner: &Inner) {
        if let Err(e) = self.persister.save_queue(&inner.state, &inner.ledger) {
            tracing::error!(error = %e, "Failed to hand queue to writer");
        }
    }

    fn persist_aliases(&self, inner: &Inner) {
        if let Err(e) = self.persister.save_custom_codes(&inner.aliases) {
            tracing::error!(error = %e, "Failed to hand custom codes to writer");
        }
    }
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("config", &self.config)
            .field("presence", &self.presence)
            .finish_non_exhaustive()
    }
}
