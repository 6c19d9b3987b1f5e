//! Ready queue
//!
//! Runnable threads sorted by ascending priority value (lower runs first).
//! A thread is inserted in front of the first entry whose priority is not
//! lower than its own, so threads of equal priority come out in reverse
//! insertion order. Games depend on this ordering; keep it.

use crate::thread::ThreadId;
use psp_core::error::KernelError;

/// One runnable thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEntry {
    pub thread: ThreadId,
    pub priority: u32,
}

/// Priority-ordered queue of ready threads
#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: Vec<ReadyEntry>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a thread. A thread that is already queued keeps its slot.
    pub fn insert(&mut self, thread: ThreadId, priority: u32) -> Result<(), KernelError> {
        if self.contains(thread) {
            return Err(KernelError::AlreadyScheduled(thread));
        }

        let position = self
            .entries
            .iter()
            .position(|e| e.priority >= priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, ReadyEntry { thread, priority });
        tracing::trace!("Scheduled 0x{:x} (priority {}) at slot {}", thread, priority, position);
        Ok(())
    }

    /// Remove a thread; absent threads are ignored
    pub fn remove(&mut self, thread: ThreadId) -> bool {
        match self.entries.iter().position(|e| e.thread == thread) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.entries.iter().any(|e| e.thread == thread)
    }

    /// Next thread to run
    pub fn head(&self) -> Option<ReadyEntry> {
        self.entries.first().copied()
    }

    pub fn pop_head(&mut self) -> Option<ReadyEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadyEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(queue: &ReadyQueue) -> Vec<ThreadId> {
        queue.iter().map(|e| e.thread).collect()
    }

    #[test]
    fn test_priority_order() {
        let mut queue = ReadyQueue::new();
        queue.insert(1, 0x30).unwrap();
        queue.insert(2, 0x10).unwrap();
        queue.insert(3, 0x20).unwrap();
        assert_eq!(order(&queue), vec![2, 3, 1]);
        assert_eq!(queue.head().unwrap().thread, 2);
    }

    #[test]
    fn test_equal_priority_is_lifo() {
        let mut queue = ReadyQueue::new();
        queue.insert(1, 0x20).unwrap();
        queue.insert(2, 0x20).unwrap();
        queue.insert(3, 0x20).unwrap();
        queue.insert(4, 0x10).unwrap();
        queue.insert(5, 0x30).unwrap();
        assert_eq!(order(&queue), vec![4, 3, 2, 1, 5]);
    }

    #[test]
    fn test_duplicate_insert_is_skipped() {
        let mut queue = ReadyQueue::new();
        queue.insert(7, 0x20).unwrap();
        assert_eq!(queue.insert(7, 0x10), Err(KernelError::AlreadyScheduled(7)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.head().unwrap().priority, 0x20);
    }

    #[test]
    fn test_remove_and_pop() {
        let mut queue = ReadyQueue::new();
        queue.insert(1, 0x20).unwrap();
        queue.insert(2, 0x21).unwrap();
        assert!(!queue.remove(9));
        assert!(queue.remove(1));
        assert_eq!(queue.pop_head().unwrap().thread, 2);
        assert!(queue.pop_head().is_none());
        assert!(queue.is_empty());
    }
}
