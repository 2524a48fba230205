//! Bounded top-k collection of scored documents.
//!
//! A min-heap keyed on score: the root is the weakest entry kept so far and
//! its score is the threshold a new document must beat. Segments whose
//! score upper bound cannot beat the threshold are skipped entirely.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::index::types::DocNum;

/// A scored document reference
#[derive(Debug, Clone, Copy)]
pub struct TopKEntry {
    pub score: f32,
    /// Position of the segment in the reader
    pub segment: usize,
    pub doc: DocNum,
}

impl PartialEq for TopKEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TopKEntry {}

impl PartialOrd for TopKEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopKEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the lowest score; later documents lose ties
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| (self.segment, self.doc).cmp(&(other.segment, other.doc)))
    }
}

pub struct TopKHeap {
    heap: BinaryHeap<TopKEntry>,
    capacity: usize,
}

impl TopKHeap {
    pub fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            capacity: k,
        }
    }

    /// Minimum score to enter; 0.0 until full
    #[inline]
    pub fn threshold(&self) -> f32 {
        if self.is_full() {
            self.heap.peek().map(|e| e.score).unwrap_or(0.0)
        } else {
            0.0
        }
    }

    #[inline]
    pub fn would_enter(&self, score: f32) -> bool {
        self.capacity > 0 && (!self.is_full() || score > self.threshold())
    }

    /// Insert if the entry beats the current minimum
    pub fn try_insert(&mut self, entry: TopKEntry) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if !self.is_full() {
            self.heap.push(entry);
            true
        } else if entry.score > self.threshold() {
            self.heap.pop();
            self.heap.push(entry);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Entries by descending score
    pub fn into_sorted_vec(self) -> Vec<TopKEntry> {
        // Ord is reversed, so ascending order is best-first
        self.heap.into_sorted_vec()
    }
}
