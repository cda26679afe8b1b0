//! A deduplicated, most-recent-first record of branch occurrences.

use crate::Outcome;

/// The latest occurrence of a branch in global history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecencyEntry {
    /// Branch address, hashed down to 32 bits
    pub tag: u32,

    /// The outcome of the latest occurrence
    pub outcome: Outcome,

    /// Absolute position of the latest occurrence in global history
    pub position: u64,
}
impl RecencyEntry {
    /// Distance of this occurrence from the newest of `recorded` branches.
    pub fn distance(&self, recorded: u64) -> u64 {
        recorded.saturating_sub(1).saturating_sub(self.position)
    }
}

/// Recency stack: at most one live entry per branch address, ordered from
/// most to least recently seen.
#[derive(Clone, Debug)]
pub struct RecencyStack {
    data: Vec<RecencyEntry>,
    capacity: usize,
}
impl RecencyStack {
    pub fn new(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
    pub fn capacity(&self) -> usize { self.capacity }

    /// Iterate from the most recently seen branch.
    pub fn iter(&self) -> impl Iterator<Item = &RecencyEntry> {
        self.data.iter()
    }

    pub fn get(&self, tag: u32) -> Option<&RecencyEntry> {
        self.data.iter().find(|e| e.tag == tag)
    }

    /// Record an occurrence of `tag`.
    ///
    /// An existing entry for the same tag is refreshed and moved to the top
    /// instead of being duplicated. Otherwise the new entry goes on top and
    /// the least recently seen entry falls off when the stack is full.
    pub fn update(&mut self, tag: u32, outcome: Outcome, position: u64) {
        if self.capacity == 0 {
            return;
        }
        if let Some(idx) = self.data.iter().position(|e| e.tag == tag) {
            self.data.remove(idx);
        } else if self.data.len() == self.capacity {
            self.data.pop();
        }
        self.data.insert(0, RecencyEntry { tag, outcome, position });
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
