use std::collections::VecDeque;

use super::session::SessionId;

/// Bounded FIFO of sessions waiting for a free outlet.
///
/// A capacity of zero disables waiting entirely: every push is refused.
///
/// # Examples
///
/// ```
/// use ev_site_sim::sim::queue::WaitingQueue;
/// use ev_site_sim::sim::session::SessionId;
///
/// let mut queue = WaitingQueue::new(1);
/// assert!(queue.push(SessionId(1)));
/// assert!(!queue.push(SessionId(2)));
/// assert_eq!(queue.pop(), Some(SessionId(1)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WaitingQueue {
    capacity: usize,
    entries: VecDeque<SessionId>,
}

impl WaitingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Appends a session; returns `false` and leaves the queue untouched if full.
    pub fn push(&mut self, id: SessionId) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push_back(id);
        true
    }

    /// Removes the longest-waiting session.
    pub fn pop(&mut self) -> Option<SessionId> {
        self.entries.pop_front()
    }

    /// Removes every session for which `leaves` returns `true`, keeping order,
    /// and returns the removed ids in queue order.
    pub fn remove_where(&mut self, mut leaves: impl FnMut(SessionId) -> bool) -> Vec<SessionId> {
        let mut removed = Vec::new();
        self.entries.retain(|id| {
            if leaves(*id) {
                removed.push(*id);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Empties the queue, returning its contents in order.
    pub fn drain(&mut self) -> Vec<SessionId> {
        self.entries.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.entries.iter().copied()
    }
}
