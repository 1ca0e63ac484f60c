//! Request prioritization.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Priority level of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Immediate = 3,
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            _ => Self::Immediate,
        }
    }
}

/// Dispatch order: higher priority first, then lower sequence first.
///
/// `Ordering::Less` means `a` is taken before `b`.
pub fn dispatch_order(a: (Priority, u64), b: (Priority, u64)) -> Ordering {
    match b.0.cmp(&a.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        ord => ord,
    }
}

/// Item with associated priority for queue ordering.
#[derive(Debug)]
pub struct PrioritizedItem<T> {
    pub priority: Priority,
    pub sequence: u64,
    pub item: T,
}

impl<T> PrioritizedItem<T> {
    fn key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }
}

impl<T> PartialEq for PrioritizedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for PrioritizedItem<T> {}

impl<T> PartialOrd for PrioritizedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PrioritizedItem<T> {
    // BinaryHeap pops the greatest element, so invert the dispatch order.
    fn cmp(&self, other: &Self) -> Ordering {
        dispatch_order(other.key(), self.key())
    }
}

/// Max-heap of items keyed by (priority, sequence).
///
/// Sequences come from the caller; the admission controller assigns them
/// once and they never change while queued.
pub struct PriorityQueue<T> {
    heap: BinaryHeap<PrioritizedItem<T>>,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn push(&mut self, item: T, priority: Priority, sequence: u64) {
        self.heap.push(PrioritizedItem { priority, sequence, item });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|p| p.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|p| &p.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every queued item.
    pub fn drain(&mut self) -> Vec<T> {
        self.heap.drain().map(|p| p.item).collect()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
