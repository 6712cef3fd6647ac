//! Delayed action queue.
//!
//! A min-priority queue ordered by `(fire_at, sequence)`. The sequence number
//! is assigned at insertion and only ever grows within a run, so actions
//! scheduled for the same instant fire in the order they were scheduled.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

use crate::clock::SimulationClock;
use crate::error::SimError;

/// Callback executed when a scheduled action fires.
pub type ActionFn = Box<dyn FnOnce(&mut SimulationClock) -> Result<(), SimError>>;

/// A callback waiting in the queue.
pub struct ScheduledAction {
    pub fire_at: Duration,
    pub sequence: u64,
    pub(crate) callback: ActionFn,
}

impl ScheduledAction {
    fn key(&self) -> (Duration, u64) {
        (self.fire_at, self.sequence)
    }
}

impl fmt::Debug for ScheduledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledAction")
            .field("fire_at", &self.fire_at)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Priority queue of scheduled callbacks.
#[derive(Debug, Default)]
pub struct ActionQueue {
    heap: BinaryHeap<Reverse<ScheduledAction>>,
    next_sequence: u64,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a callback and returns its sequence number.
    pub fn push(&mut self, fire_at: Duration, callback: ActionFn) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(ScheduledAction {
            fire_at,
            sequence,
            callback,
        }));
        sequence
    }

    /// Pops the earliest action if it fires at or before `end`.
    pub fn pop_due(&mut self, end: Duration) -> Option<ScheduledAction> {
        if self.next_fire_at()? > end {
            return None;
        }
        self.heap.pop().map(|Reverse(action)| action)
    }

    /// Fire time of the earliest pending action.
    pub fn next_fire_at(&self) -> Option<Duration> {
        self.heap.peek().map(|Reverse(action)| action.fire_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drops every pending action and restarts sequence numbering.
    ///
    /// The heap's allocation is kept for the next run.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ActionFn {
        Box::new(|_| Ok(()))
    }

    #[test]
    fn pops_in_time_then_sequence_order() {
        let mut queue = ActionQueue::new();
        let t = Duration::from_secs;
        queue.push(t(3), noop());
        queue.push(t(1), noop());
        queue.push(t(3), noop());
        queue.push(t(2), noop());

        let order: Vec<(Duration, u64)> = std::iter::from_fn(|| queue.pop_due(t(10)))
            .map(|action| (action.fire_at, action.sequence))
            .collect();
        assert_eq!(order, vec![(t(1), 1), (t(2), 3), (t(3), 0), (t(3), 2)]);
    }

    #[test]
    fn pop_due_respects_the_horizon() {
        let mut queue = ActionQueue::new();
        queue.push(Duration::from_secs(5), noop());
        assert!(queue.pop_due(Duration::from_secs(4)).is_none());
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(Duration::from_secs(5)).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_restarts_sequences() {
        let mut queue = ActionQueue::new();
        queue.push(Duration::ZERO, noop());
        queue.push(Duration::ZERO, noop());
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.push(Duration::ZERO, noop()), 0);
    }
}
