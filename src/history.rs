//! Global history shared by the perceptron predictor.
//!
//! [`HistoryTracker`] keeps the outcomes and (hashed) addresses of the last
//! [`GHL`] committed conditional branches in a circular buffer, along with
//! any number of folded projections of the outcome history and a
//! [`RecencyStack`] of the latest occurrence of each branch.

pub mod folded;
pub mod recency;

pub use folded::*;
pub use recency::*;

use bitvec::prelude::*;
use itertools::Itertools;

use crate::{Addr, Outcome, BRANCH_SHIFT};

/// Capacity of global history [in branches].
pub const GHL: usize = 4096;

/// Hash a branch address down to the tag kept in path history.
pub fn path_tag(addr: Addr) -> u32 {
    (addr >> BRANCH_SHIFT) as u32
}

/// A branch from the filtered window of global history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilteredEntry {
    /// Hashed branch address (see [`path_tag`])
    pub tag: u32,

    /// The outcome of this occurrence
    pub outcome: Outcome,

    /// Number of branches recorded since this one
    pub distance: usize,
}

pub struct HistoryTracker {
    /// Outcome history
    ghr: BitVec<usize, Lsb0>,

    /// Address history
    path: Vec<u32>,

    /// Next slot to be written
    head: usize,

    /// Total number of branches recorded
    count: u64,

    /// Folded projections of outcome history
    folded: Vec<FoldedHistory>,

    recency: RecencyStack,
}

// Prints the valid part of outcome history, newest on the left.
impl std::fmt::Display for HistoryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let x: String = (0..self.len())
            .map(|d| if self.ghr[self.slot(d)] { '1' } else { '0' })
            .collect();
        write!(f, "{}", x)
    }
}

impl HistoryTracker {
    /// Create an empty history with a recency stack of `rs_capacity` entries.
    pub fn new(rs_capacity: usize) -> Self {
        Self {
            ghr: bitvec![usize, Lsb0; 0; GHL],
            path: vec![0; GHL],
            head: 0,
            count: 0,
            folded: Vec::new(),
            recency: RecencyStack::new(rs_capacity),
        }
    }

    /// Track a new folded projection of the newest `len` outcomes onto
    /// `width` bits, returning its index for [`HistoryTracker::folded`].
    ///
    /// Projections start from the current contents of history.
    pub fn add_folded(&mut self, len: usize, width: usize) -> usize {
        assert!(len <= GHL);
        let mut f = FoldedHistory::new(len, width);
        let valid = self.len().min(len);
        for d in (0..valid).rev() {
            f.update(self.ghr[self.slot(d)], false);
        }
        self.folded.push(f);
        self.folded.len() - 1
    }

    /// Number of valid entries in history.
    pub fn len(&self) -> usize {
        self.count.min(GHL as u64) as usize
    }

    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// Total number of branches ever recorded.
    pub fn recorded(&self) -> u64 { self.count }

    /// Buffer slot holding the branch `distance` entries deep.
    fn slot(&self, distance: usize) -> usize {
        (self.head + GHL - 1 - distance) % GHL
    }

    /// Outcome of the branch `distance` entries deep (0 is the newest).
    pub fn outcome_at(&self, distance: usize) -> Option<Outcome> {
        if distance < self.len() {
            Some(Outcome::from(self.ghr[self.slot(distance)]))
        } else {
            None
        }
    }

    /// Hashed address of the branch `distance` entries deep.
    pub fn addr_at(&self, distance: usize) -> Option<u32> {
        if distance < self.len() {
            Some(self.path[self.slot(distance)])
        } else {
            None
        }
    }

    /// The newest `n` outcomes packed into a word, newest in bit 0.
    /// Positions never written read as not-taken.
    pub fn outcome_bits(&self, n: usize) -> u64 {
        assert!(n <= 64);
        (0..n.min(self.len())).fold(0, |acc, d| {
            acc | ((self.ghr[self.slot(d)] as u64) << d)
        })
    }

    pub fn folded(&self, idx: usize) -> usize {
        self.folded[idx].value()
    }

    pub fn folded_histories(&self) -> &[FoldedHistory] {
        &self.folded
    }

    pub fn recency(&self) -> &RecencyStack {
        &self.recency
    }

    /// Record a committed branch.
    pub fn record(&mut self, addr: Addr, outcome: Outcome) {
        let taken = bool::from(outcome);

        // Advance each projection before the leaving bit is overwritten
        for f in self.folded.iter_mut() {
            let leaving = f.len() > 0
                && f.len() <= GHL
                && self.count >= f.len() as u64
                && self.ghr[(self.head + GHL - f.len()) % GHL];
            let entering = f.len() > 0 && taken;
            f.update(entering, leaving);
        }

        self.ghr.set(self.head, taken);
        self.path[self.head] = path_tag(addr);
        self.head = (self.head + 1) % GHL;
        self.count += 1;
    }

    /// Note the latest occurrence of a branch in the recency stack,
    /// stamped with the position of the most recently recorded branch.
    pub fn update_recency(&mut self, addr: Addr, outcome: Outcome) {
        let pos = self.count.saturating_sub(1);
        self.recency.update(path_tag(addr), outcome, pos);
    }

    /// Iterate over branches at distances `start..end` from the newest,
    /// keeping only the most recent occurrence of each address.
    ///
    /// Positions that were never written are skipped. The iterator is lazy,
    /// so callers may stop after as many entries as they need.
    pub fn filtered_view(&self, start: usize, end: usize)
        -> impl Iterator<Item = FilteredEntry> + '_
    {
        let end = end.min(self.len());
        (start..end)
            .map(move |distance| {
                let slot = self.slot(distance);
                FilteredEntry {
                    tag: self.path[slot],
                    outcome: Outcome::from(self.ghr[slot]),
                    distance,
                }
            })
            .unique_by(|e| e.tag)
    }

    /// Forget all history.
    pub fn clear(&mut self) {
        self.ghr.fill(false);
        self.path.fill(0);
        self.head = 0;
        self.count = 0;
        self.folded.iter_mut().for_each(|f| f.reset());
        self.recency.clear();
    }
}
