//! Bounded, non-blocking FIFO with an explicit overflow policy
//!
//! Used for the agent record buffer, the agent outbound batch queue and
//! every sink queue. Producers are never blocked: a full queue either evicts
//! its oldest entry or rejects the incoming one.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What to do when pushing onto a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest entry to make room
    DropOldest,
    /// Reject the incoming entry, preserving what is already queued
    #[default]
    DropNewest,
}

/// Result of a push
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome<T> {
    Accepted,
    /// The value was queued and this older entry was evicted
    Evicted(T),
    /// The queue was full and the value was not queued
    Rejected(T),
}

impl<T> PushOutcome<T> {
    pub fn is_queued(&self) -> bool {
        !matches!(self, PushOutcome::Rejected(_))
    }
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Create a queue; a zero capacity is raised to one
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            policy,
        }
    }

    pub fn push(&mut self, value: T) -> PushOutcome<T> {
        if self.items.len() < self.capacity {
            self.items.push_back(value);
            return PushOutcome::Accepted;
        }

        match self.policy {
            OverflowPolicy::DropNewest => PushOutcome::Rejected(value),
            OverflowPolicy::DropOldest => {
                // Capacity is at least one, so a full queue has a front
                let evicted = self.items.pop_front();
                self.items.push_back(value);
                match evicted {
                    Some(old) => PushOutcome::Evicted(old),
                    None => PushOutcome::Accepted,
                }
            }
        }
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Remove and return every entry in FIFO order
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// True once the queue holds at least `mark` entries
    pub fn is_above(&self, mark: usize) -> bool {
        self.items.len() >= mark
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut queue = BoundedQueue::new(3, OverflowPolicy::DropNewest);
        assert_eq!(queue.push(1), PushOutcome::Accepted);
        assert_eq!(queue.push(2), PushOutcome::Accepted);
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_full());
    }

    #[test]
    fn test_drop_oldest_evicts_front() {
        let mut queue = BoundedQueue::new(2, OverflowPolicy::DropOldest);
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.push("c"), PushOutcome::Evicted("a"));
        assert_eq!(queue.drain_all(), vec!["b", "c"]);
    }

    #[test]
    fn test_drop_newest_rejects_incoming() {
        let mut queue = BoundedQueue::new(2, OverflowPolicy::DropNewest);
        queue.push("a");
        queue.push("b");
        let outcome = queue.push("c");
        assert!(!outcome.is_queued());
        assert_eq!(outcome, PushOutcome::Rejected("c"));
        assert_eq!(queue.drain_all(), vec!["a", "b"]);
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let mut queue = BoundedQueue::new(0, OverflowPolicy::DropOldest);
        assert_eq!(queue.capacity(), 1);
        queue.push(1);
        assert_eq!(queue.push(2), PushOutcome::Evicted(1));
        assert_eq!(queue.pop_front(), Some(2));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_default_policy_is_drop_newest() {
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::DropNewest);
        let policy: OverflowPolicy = serde_json::from_str("\"drop_oldest\"").unwrap();
        assert_eq!(policy, OverflowPolicy::DropOldest);
    }
}
