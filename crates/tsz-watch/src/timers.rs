//! Keyed one-shot timers.
//!
//! Scheduling a key that is already pending replaces its deadline, which is
//! how debouncing is expressed throughout the crate.

use std::hash::Hash;
use std::time::Instant;

use rustc_hash::FxHashMap;

#[derive(Debug)]
pub struct TimerQueue<K> {
    deadlines: FxHashMap<K, Instant>,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            deadlines: FxHashMap::default(),
        }
    }
}

impl<K: Copy + Eq + Hash + Ord> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` at `deadline`, cancelling any pending timer for it.
    pub fn schedule(&mut self, key: K, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    pub fn cancel(&mut self, key: K) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.deadlines.contains_key(&key)
    }

    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.deadlines.get(&key).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Remove and return every key due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, *key))
            .collect();
        due.sort();
        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reschedule_replaces_deadline() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(1u8, start + Duration::from_millis(250));
        timers.schedule(1u8, start + Duration::from_millis(400));

        assert!(timers.take_due(start + Duration::from_millis(300)).is_empty());
        assert_eq!(timers.take_due(start + Duration::from_millis(400)), vec![1]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_due_keys_in_deadline_order() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(2u8, start + Duration::from_millis(20));
        timers.schedule(1u8, start + Duration::from_millis(30));
        timers.schedule(3u8, start + Duration::from_millis(10));
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(10)));
        assert_eq!(timers.take_due(start + Duration::from_millis(30)), vec![3, 2, 1]);
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(7u8, start);
        assert!(timers.cancel(7));
        assert!(!timers.cancel(7));
        assert!(timers.take_due(start).is_empty());
    }
}
