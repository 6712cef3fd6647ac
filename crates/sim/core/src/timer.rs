//! Timers and cooldowns.
//!
//! A [`Timer`] is a single absolute "ready at" instant. Readiness is computed
//! lazily by comparison, so no events are scheduled for cooldown expiry.
//! Timers live in the clock's [`TimerRegistry`] and are referenced by
//! [`TimerId`], which lets several cooldowns share one timer (a global
//! cooldown, a category lockout).

use std::fmt;
use std::time::Duration;

use crate::error::SimError;

/// Handle to a timer owned by a [`TimerRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimerId(pub u32);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Absolute ready-at instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timer {
    ready_at: Duration,
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            ready_at: Duration::ZERO,
        }
    }

    pub const fn ready_at(&self) -> Duration {
        self.ready_at
    }

    /// `now >= ready_at`.
    pub fn is_ready(&self, now: Duration) -> bool {
        now >= self.ready_at
    }

    /// Forces an arbitrary ready time.
    pub fn set(&mut self, ready_at: Duration) {
        self.ready_at = ready_at;
    }

    /// Starts the timer: ready again at `now + duration`, saturating at
    /// `Duration::MAX` (never ready again).
    pub fn use_for(&mut self, now: Duration, duration: Duration) {
        self.ready_at = now.saturating_add(duration);
    }

    /// Time left until ready, zero when already ready.
    pub fn remaining(&self, now: Duration) -> Duration {
        self.ready_at.saturating_sub(now)
    }
}

/// A timer paired with the duration it is started for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cooldown {
    pub timer: TimerId,
    pub duration: Duration,
}

impl Cooldown {
    pub const fn new(timer: TimerId, duration: Duration) -> Self {
        Self { timer, duration }
    }

    pub fn is_ready(&self, timers: &TimerRegistry, now: Duration) -> Result<bool, SimError> {
        Ok(timers.get(self.timer)?.is_ready(now))
    }

    /// Starts the cooldown at `now`.
    pub fn use_at(&self, timers: &mut TimerRegistry, now: Duration) -> Result<(), SimError> {
        timers.get_mut(self.timer)?.use_for(now, self.duration);
        Ok(())
    }

    pub fn ready_at(&self, timers: &TimerRegistry) -> Result<Duration, SimError> {
        Ok(timers.get(self.timer)?.ready_at())
    }
}

/// Arena of timers owned by one simulation clock.
#[derive(Clone, Debug, Default)]
pub struct TimerRegistry {
    timers: Vec<Timer>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self) -> TimerId {
        let id = TimerId(self.timers.len() as u32);
        self.timers.push(Timer::new());
        id
    }

    pub fn get(&self, id: TimerId) -> Result<&Timer, SimError> {
        self.timers
            .get(id.0 as usize)
            .ok_or(SimError::UnknownTimer(id))
    }

    pub fn get_mut(&mut self, id: TimerId) -> Result<&mut Timer, SimError> {
        self.timers
            .get_mut(id.0 as usize)
            .ok_or(SimError::UnknownTimer(id))
    }

    /// Makes every timer ready at time zero.
    pub fn reset(&mut self) {
        self.timers.fill(Timer::new());
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
