//! Helpers for collecting statistics.

use std::collections::*;

use bitvec::prelude::*;
use itertools::*;

use crate::{Addr, Outcome};

/// A destination for named statistics, i.e. the statistics database of a
/// host simulator.
pub trait StatSink {
    /// Register a counter.
    fn counter(&mut self, name: &str, desc: &str, value: u64);

    /// Register a value derived from other counters.
    fn rate(&mut self, name: &str, desc: &str, value: f64);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatValue {
    Counter(u64),
    Rate(f64),
}
impl std::fmt::Display for StatValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Counter(x) => write!(f, "{}", x),
            Self::Rate(x) => write!(f, "{:.4}", x),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatEntry {
    pub name: String,
    pub desc: String,
    pub value: StatValue,
}

/// A [StatSink] which keeps entries in registration order.
#[derive(Clone, Debug, Default)]
pub struct StatList {
    entries: Vec<StatEntry>,
}
impl StatList {
    pub fn new() -> Self { Self::default() }

    pub fn entries(&self) -> &[StatEntry] { &self.entries }

    pub fn get(&self, name: &str) -> Option<StatValue> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.value)
    }

    /// Print entries as `name value # description`.
    pub fn write(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        let width = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        for e in self.entries.iter() {
            writeln!(w, "{:width$} {:>14} # {}", e.name, e.value.to_string(), e.desc,
                width = width)?;
        }
        Ok(())
    }
}
impl StatSink for StatList {
    fn counter(&mut self, name: &str, desc: &str, value: u64) {
        self.entries.push(StatEntry {
            name: name.to_string(), desc: desc.to_string(), value: StatValue::Counter(value),
        });
    }
    fn rate(&mut self, name: &str, desc: &str, value: f64) {
        self.entries.push(StatEntry {
            name: name.to_string(), desc: desc.to_string(), value: StatValue::Rate(value),
        });
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Counters kept by a [`crate::BranchPredictor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PredictorStats {
    /// Number of lookups
    pub lookups: u64,

    /// Number of branches updated
    pub updates: u64,

    /// Number of correct target predictions
    pub addr_hits: u64,

    /// Number of correct direction predictions
    pub dir_hits: u64,

    /// Number of mispredictions
    pub misses: u64,

    /// Number of predictions made by the first/second component of a
    /// combined predictor
    pub used_first: u64,
    pub used_second: u64,

    /// Number of returns predicted with the RAS, and how many were correct
    pub used_ras: u64,
    pub ras_hits: u64,

    /// Number of indirect jumps, and how many had correct targets
    pub jr_seen: u64,
    pub jr_hits: u64,

    /// Indirect jumps which are not returns
    pub jr_non_ras_seen: u64,
    pub jr_non_ras_hits: u64,

    pub ras_pushes: u64,
    pub ras_pops: u64,

    pub btb_hits: u64,
    pub btb_misses: u64,
}
impl PredictorStats {
    pub fn addr_rate(&self) -> f64 { ratio(self.addr_hits, self.updates) }
    pub fn dir_rate(&self) -> f64 { ratio(self.dir_hits, self.updates) }
    pub fn jr_rate(&self) -> f64 { ratio(self.jr_hits, self.jr_seen) }
    pub fn jr_non_ras_rate(&self) -> f64 { ratio(self.jr_non_ras_hits, self.jr_non_ras_seen) }
    pub fn ras_rate(&self) -> f64 { ratio(self.ras_hits, self.used_ras) }

    /// Register every statistic under `prefix` (i.e. "bpred_comb").
    pub fn register(&self, prefix: &str, sink: &mut impl StatSink) {
        let counters = [
            ("lookups", "total number of bpred lookups", self.lookups),
            ("updates", "total number of updates", self.updates),
            ("addr_hits", "total number of address-predicted hits", self.addr_hits),
            ("dir_hits", "total number of direction-predicted hits \
                (includes addr-hits)", self.dir_hits),
            ("used_first", "total number of first-component predictions used", self.used_first),
            ("used_second", "total number of second-component predictions used", self.used_second),
            ("misses", "total number of misses", self.misses),
            ("jr_hits", "total number of address-predicted hits for JR's", self.jr_hits),
            ("jr_seen", "total number of JR's seen", self.jr_seen),
            ("jr_non_ras_hits", "total number of address-predicted hits for non-RAS JR's",
                self.jr_non_ras_hits),
            ("jr_non_ras_seen", "total number of non-RAS JR's seen", self.jr_non_ras_seen),
            ("used_ras", "total number of RAS predictions used", self.used_ras),
            ("ras_hits", "total number of RAS hits", self.ras_hits),
            ("ras_pushes", "total number of address pushed onto ret-addr stack", self.ras_pushes),
            ("ras_pops", "total number of address popped off of ret-addr stack", self.ras_pops),
            ("btb_hits", "total number of BTB hits", self.btb_hits),
            ("btb_misses", "total number of BTB misses", self.btb_misses),
        ];
        for (name, desc, value) in counters {
            sink.counter(&format!("{}.{}", prefix, name), desc, value);
        }

        let rates = [
            ("bpred_addr_rate", "branch address-prediction rate (i.e., addr-hits/updates)",
                self.addr_rate()),
            ("bpred_dir_rate", "branch direction-prediction rate (i.e., all-hits/updates)",
                self.dir_rate()),
            ("bpred_jr_rate", "JR address-prediction rate (i.e., JR addr-hits/JRs seen)",
                self.jr_rate()),
            ("bpred_jr_non_ras_rate", "non-RAS JR addr-pred rate \
                (ie, non-RAS JR hits/JRs seen)", self.jr_non_ras_rate()),
            ("ras_rate", "return address prediction rate (i.e., RAS hits/used RAS)",
                self.ras_rate()),
        ];
        for (name, desc, value) in rates {
            sink.rate(&format!("{}.{}", prefix, name), desc, value);
        }
    }
}

/// Container for recording per-branch statistics while running a trace.
pub struct BranchStats {
    /// Per-branch data (indexed by program counter value)
    pub data: BTreeMap<Addr, BranchData>,

    /// Number of correct direction predictions
    pub global_hits: usize,

    /// Number of times any conditional branch was executed
    pub global_brns: usize,
}
impl Default for BranchStats {
    fn default() -> Self { Self::new() }
}
impl BranchStats {
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            global_hits: 0,
            global_brns: 0,
        }
    }

    /// Return the global hit rate.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.global_hits as u64, self.global_brns as u64)
    }

    /// Return the global miss count.
    pub fn global_miss(&self) -> usize { self.global_brns - self.global_hits }

    /// Record a predicted and resolved direction for the branch at `pc`.
    pub fn record(&mut self, pc: Addr, predicted: Outcome, outcome: Outcome) {
        let hit = predicted == outcome;
        self.global_brns += 1;
        if hit { self.global_hits += 1; }

        let data = self.data.entry(pc).or_default();
        data.occ += 1;
        data.pat.push(outcome.into());
        if hit { data.hits += 1; }
    }

    /// Returns a reference to data collected for a particular branch.
    pub fn get(&self, pc: Addr) -> Option<&BranchData> {
        self.data.get(&pc)
    }

    /// Returns the number of unique observed branch instructions.
    pub fn num_unique_branches(&self) -> usize {
        self.data.len()
    }

    /// Returns the number of branches that are always taken.
    pub fn num_always_taken(&self) -> usize {
        self.data.values().filter(|d| d.is_always_taken()).count()
    }

    /// Returns the number of branches that are never taken.
    pub fn num_never_taken(&self) -> usize {
        self.data.values().filter(|d| d.is_never_taken()).count()
    }

    /// Return at most `n` of the most frequently mispredicted branches.
    pub fn worst_branches(&self, n: usize) -> Vec<(Addr, &BranchData)> {
        self.data.iter()
            .sorted_by(|x, y| x.1.misses().cmp(&y.1.misses()).then(y.0.cmp(x.0)))
            .rev()
            .take(n)
            .map(|(pc, d)| (*pc, d))
            .collect()
    }
}

/// Container for per-branch statistics.
#[derive(Default)]
pub struct BranchData {
    /// Number of times this branch was encountered.
    pub occ: usize,

    /// Number of correct predictions for this branch.
    pub hits: usize,

    /// Record of all observed outcomes for this branch.
    pub pat: BitVec,
}
impl BranchData {
    /// Return the hit rate for this branch.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits as u64, self.occ as u64)
    }

    pub fn misses(&self) -> usize { self.occ - self.hits }

    pub fn is_always_taken(&self) -> bool {
        self.pat.count_ones() == self.pat.len()
    }

    pub fn is_never_taken(&self) -> bool {
        self.pat.count_zeros() == self.pat.len()
    }

    pub fn times_taken(&self) -> usize {
        self.pat.count_ones()
    }
}
