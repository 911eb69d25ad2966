//! Ordered file queue of one run

use crate::monitor::FileRecord;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::{trace, warn};

/// Min-heap of marker files, always yielding the smallest record first.
///
/// Not synchronized on its own: the owning observer guards it with its
/// per-run lock, together with the statistics updated alongside each push
/// and pop.
#[derive(Debug, Default)]
pub struct RunQueue {
    heap: BinaryHeap<Reverse<FileRecord>>,
    size_max: usize,
}

impl RunQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record
    pub fn push(&mut self, record: FileRecord) {
        debug_assert!(!record.is_empty(), "placeholder records never enter the queue");
        trace!("Enqueuing {}", record);
        self.heap.push(Reverse(record));
        self.size_max = self.size_max.max(self.heap.len());
    }

    /// The next record to deliver, without removing it
    pub fn peek(&self) -> Option<&FileRecord> {
        self.heap.peek().map(|Reverse(record)| record)
    }

    /// Remove and return the next record to deliver
    pub fn pop(&mut self) -> Option<FileRecord> {
        self.heap.pop().map(|Reverse(record)| record)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Largest size the queue ever reached
    pub fn size_max(&self) -> usize {
        self.size_max
    }

    /// Swap the backing storage for a fresh one, keeping the high-water mark.
    ///
    /// Used once the run is over to give the heap's allocation back. A queue
    /// still holding records is left alone.
    pub fn release(&mut self) -> bool {
        if !self.heap.is_empty() {
            warn!("Not releasing queue storage, {} records left", self.heap.len());
            return false;
        }
        self.heap = BinaryHeap::new();
        true
    }

    /// Records in delivery order, for inspection
    pub fn list_all(&self) -> Vec<FileRecord> {
        let mut items: Vec<_> = self.heap.iter().map(|Reverse(record)| *record).collect();
        items.sort();
        items
    }
}
