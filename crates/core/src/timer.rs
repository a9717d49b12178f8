//! Per-level play timer.
//!
//! Counts down the time the broadcaster spends on the current level. Time is
//! read through a [`Clock`] so tests can drive it deterministically.

use std::sync::{Arc, Mutex};

use chrono::Duration;

use crate::types::Timestamp;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, to: Timestamp) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running { deadline: Timestamp },
    Paused { remaining: Duration },
}

/// Countdown with pause/resume.
#[derive(Clone)]
pub struct LevelTimer {
    clock: Arc<dyn Clock>,
    duration: Option<Duration>,
    state: TimerState,
}

impl std::fmt::Debug for LevelTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelTimer")
            .field("duration", &self.duration)
            .field("state", &self.state)
            .finish()
    }
}

impl LevelTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            duration: None,
            state: TimerState::Stopped,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Start a fresh countdown of `duration`, replacing any running one.
    pub fn start(&mut self, duration: Duration) {
        self.duration = Some(duration);
        self.state = TimerState::Running {
            deadline: self.clock.now() + duration,
        };
    }

    /// Restart with the last started duration. Returns `false` if the timer
    /// was never started.
    pub fn restart(&mut self) -> bool {
        match self.duration {
            Some(duration) => {
                self.start(duration);
                true
            }
            None => false,
        }
    }

    /// Freeze the countdown. Returns `false` unless it was running.
    pub fn pause(&mut self) -> bool {
        let TimerState::Running { deadline } = self.state else {
            return false;
        };
        let remaining = (deadline - self.clock.now()).max(Duration::zero());
        self.state = TimerState::Paused { remaining };
        true
    }

    /// Continue a paused countdown. Returns `false` unless it was paused.
    pub fn resume(&mut self) -> bool {
        let TimerState::Paused { remaining } = self.state else {
            return false;
        };
        self.state = TimerState::Running {
            deadline: self.clock.now() + remaining,
        };
        true
    }

    pub fn stop(&mut self) {
        self.state = TimerState::Stopped;
    }

    /// Time left, or `None` when stopped.
    pub fn remaining(&self) -> Option<Duration> {
        match self.state {
            TimerState::Stopped => None,
            TimerState::Running { deadline } => {
                Some((deadline - self.clock.now()).max(Duration::zero()))
            }
            TimerState::Paused { remaining } => Some(remaining),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.state, TimerState::Running { deadline } if self.clock.now() >= deadline)
    }
}
