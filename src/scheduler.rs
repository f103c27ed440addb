//! Keyed debounce table: at most one pending deadline per key, and a
//! re-schedule pushes the deadline out from the latest call.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct CoalescingScheduler<K> {
    pending: HashMap<K, Instant>,
}

impl<K> Default for CoalescingScheduler<K> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> CoalescingScheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when an already pending entry was superseded.
    pub fn schedule(&mut self, key: K, delay: Duration) -> bool {
        self.schedule_at(key, Instant::now() + delay)
    }

    pub fn schedule_at(&mut self, key: K, deadline: Instant) -> bool {
        self.pending.insert(key, deadline).is_some()
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn cancel_all(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every key whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(k, deadline)| (*deadline, k.clone()))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, key) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(_, k)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reschedule_replaces_pending_entry() {
        let mut s = CoalescingScheduler::new();
        let t0 = Instant::now();
        assert!(!s.schedule_at("logs", t0 + Duration::from_millis(300)));
        assert!(s.schedule_at("logs", t0 + Duration::from_millis(500)));
        assert_eq!(s.len(), 1);
        assert_eq!(s.next_deadline(), Some(t0 + Duration::from_millis(500)));
        assert!(s.take_due(t0 + Duration::from_millis(300)).is_empty());
        assert_eq!(s.take_due(t0 + Duration::from_millis(500)), vec!["logs"]);
        assert!(s.is_empty());
    }

    #[test]
    fn test_take_due_orders_by_deadline() {
        let mut s = CoalescingScheduler::new();
        let t0 = Instant::now();
        s.schedule_at("b", t0 + Duration::from_millis(20));
        s.schedule_at("a", t0 + Duration::from_millis(10));
        s.schedule_at("c", t0 + Duration::from_millis(90));
        assert_eq!(s.take_due(t0 + Duration::from_millis(50)), vec!["a", "b"]);
        assert!(s.is_pending(&"c"));
    }

    #[test]
    fn test_cancel_and_cancel_all() {
        let mut s = CoalescingScheduler::new();
        let t0 = Instant::now();
        s.schedule_at(1u8, t0);
        s.schedule_at(2u8, t0);
        assert!(s.cancel(&1));
        assert!(!s.cancel(&1));
        assert_eq!(s.cancel_all(), 1);
        assert!(s.next_deadline().is_none());
        assert!(s.take_due(t0 + Duration::from_secs(1)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_from_last_call() {
        let mut s = CoalescingScheduler::new();
        let start = Instant::now();
        for _ in 0..5 {
            s.schedule("logs", Duration::from_millis(300));
            tokio::time::advance(Duration::from_millis(50)).await;
        }
        // Last schedule happened at t=200ms.
        assert_eq!(s.next_deadline(), Some(start + Duration::from_millis(500)));
        assert!(s.take_due(Instant::now()).is_empty());
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(s.take_due(Instant::now()), vec!["logs"]);
        assert!(s.take_due(Instant::now()).is_empty());
    }
}
