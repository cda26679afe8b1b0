//! Perceptron direction predictor.
//!
//! See the following papers:
//!
//! - "Dynamic Branch Prediction with Perceptrons" (Jiménez and Lin, 2001)
//! - "Neural Methods for Dynamic Branch Prediction" (Jiménez and Lin, 2002)
//! - "Analysis of the O-GEometric History Length branch predictor"
//!   (Seznec, 2005) for the adaptive training threshold
//!
//! Each branch address selects a row of weights correlated with recent
//! global history. The output is also boosted by a table of "path" weights
//! selected by the branches held in the recency stack and by the branches
//! found deeper in history (the filtered view). A branch status table
//! filters out branches which have only ever gone one way.

use std::collections::VecDeque;

use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::PerceptronConfig;
use crate::error::{BpredError, ConfigError};
use crate::history::HistoryTracker;
use crate::{Addr, Outcome, BRANCH_SHIFT};

/// The bias weight keeps training while the output is this small.
pub const TRAIN_TH: i32 = 107;

/// Bounds of the threshold counter.
pub const TC_MIN: i32 = -64;
pub const TC_MAX: i32 = 63;

/// Speculated lookups kept for repair. Older lookups are folded into
/// speculative history with the direction they have at that point.
pub const MAX_INFLIGHT: usize = 4096;

// Salts keeping the two kinds of path weights apart
const RS_SALT: u64 = 0x5253;
const FILTERED_SALT: u64 = 0x4648;

/// Perceptron [with integer weights].
///
/// The bias weight lives at index 0, followed by one weight per bit of
/// global history. Only history weights selected by the mask are used.
#[derive(Clone, Debug)]
pub struct Perceptron {
    weights: Box<[i32]>,
    mask: u64,
    accesses: u64,
}
impl Perceptron {
    pub fn new(history_length: usize) -> Self {
        let mask = if history_length >= 64 { u64::MAX } else { (1 << history_length) - 1 };
        Self { weights: vec![0; history_length + 1].into_boxed_slice(), mask, accesses: 0 }
    }

    pub fn mask(&self) -> u64 { self.mask }

    /// Select the history weights which take part in prediction and
    /// training. Bits beyond the history length are ignored.
    pub fn set_mask(&mut self, mask: u64) {
        let len = self.weights.len() - 1;
        self.mask = if len >= 64 { mask } else { mask & ((1 << len) - 1) };
    }

    fn is_masked(&self, i: usize) -> bool {
        (self.mask >> i) & 1 != 0
    }

    pub fn bias(&self) -> i32 { self.weights[0] }

    /// Weights correlated with global history, newest bit first.
    pub fn weights(&self) -> &[i32] { &self.weights[1..] }

    /// Number of lookups which selected this perceptron.
    pub fn accesses(&self) -> u64 { self.accesses }

    /// Dot product of the weights with the history (as +1/-1 inputs),
    /// plus the bias.
    pub fn output(&self, history: u64) -> i32 {
        self.weights[1..].iter().enumerate()
            .filter(|(i, _)| self.is_masked(*i))
            .fold(self.weights[0], |sum, (i, w)| {
                if (history >> i) & 1 != 0 { sum + w } else { sum - w }
            })
    }

    /// When a bit in the history matches the outcome, increment the
    /// corresponding weight. Otherwise, decrement the corresponding weight.
    pub fn train(&mut self, history: u64, outcome: Outcome, lo: i32, hi: i32) {
        self.train_bias(outcome, lo, hi);
        let taken = bool::from(outcome);
        let mask = self.mask;
        for (i, w) in self.weights[1..].iter_mut().enumerate() {
            if (mask >> i) & 1 == 0 {
                continue;
            }
            let adj = if ((history >> i) & 1 != 0) == taken { 1 } else { -1 };
            *w = (*w + adj).clamp(lo, hi);
        }
    }

    pub fn train_bias(&mut self, outcome: Outcome, lo: i32, hi: i32) {
        self.weights[0] = (self.weights[0] + outcome.sign()).clamp(lo, hi);
    }
}

/// What has been observed about a branch so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchStatus {
    NotFound,
    /// Only ever taken
    Taken,
    /// Only ever not-taken
    NotTaken,
    NonBiased,
}
impl BranchStatus {
    pub fn next(self, outcome: Outcome) -> Self {
        match (self, outcome) {
            (Self::NotFound, Outcome::T) => Self::Taken,
            (Self::NotFound, Outcome::N) => Self::NotTaken,
            (Self::Taken, Outcome::N) | (Self::NotTaken, Outcome::T) => Self::NonBiased,
            (s, _) => s,
        }
    }

    /// The only direction this branch has gone, if it is biased.
    pub fn bias(self) -> Option<Outcome> {
        match self {
            Self::Taken => Some(Outcome::T),
            Self::NotTaken => Some(Outcome::N),
            _ => None,
        }
    }
}

/// A point in speculative history. Lookups made after it are discarded
/// by [PerceptronPredictor::recover].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecCheckpoint {
    /// Sequence number of the first lookup after the checkpoint
    pub seq: u64,
}

/// A lookup whose direction is in speculative history.
#[derive(Clone, Copy, Debug)]
struct InFlight {
    seq: u64,
    dir: Outcome,
    resolved: bool,
}

/// Everything needed to train the perceptron for one lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PerceptronContext {
    /// Row of the perceptron table
    pub row: usize,

    /// Global history used for the prediction
    pub history: u64,

    /// Path weights used for the prediction, with the outcomes they were
    /// paired with
    pub path: Vec<(usize, Outcome)>,

    /// Perceptron output
    pub sum: i32,

    /// Direction given by the sign of the output
    pub output: Outcome,

    /// Direction actually predicted
    pub prediction: Outcome,

    /// The prediction came from the branch status table
    pub used_bias: bool,

    pub seq: u64,
}

pub struct PerceptronPredictor {
    cfg: PerceptronConfig,
    table: Vec<Perceptron>,
    path_weights: Vec<i32>,
    bst: Vec<BranchStatus>,
    tracker: HistoryTracker,

    /// Folded history used to index the perceptron table
    index_fold: Option<usize>,

    /// Committed global history, newest in bit 0
    history: u64,

    /// Global history including predicted directions of unresolved branches
    spec_history: u64,

    /// Speculative history older than every entry in `inflight`
    spec_base: u64,

    /// Speculated lookups in program order, oldest first
    inflight: VecDeque<InFlight>,
    next_seq: u64,

    threshold: i32,
    tc: i32,

    /// Weight limits
    wmin: i32,
    wmax: i32,

    rng: SmallRng,
}
impl PerceptronPredictor {
    pub fn new(cfg: PerceptronConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let mut tracker = HistoryTracker::new(cfg.rs_depth);
        let index_fold = if cfg.index_history > 0 && cfg.num_perceptrons > 1 {
            Some(tracker.add_folded(cfg.index_history, cfg.num_perceptrons.ilog2() as usize))
        } else {
            None
        };
        let wmax = (1 << (cfg.weight_bits - 1)) - 1;
        let wmin = -(1 << (cfg.weight_bits - 1));
        debug!("perceptron: {} rows x {} weights, threshold {}, {} path weights",
            cfg.num_perceptrons, cfg.history_length + 1, cfg.threshold,
            1usize << cfg.log_path_weights);
        Ok(Self {
            table: vec![Perceptron::new(cfg.history_length); cfg.num_perceptrons],
            path_weights: vec![0; 1 << cfg.log_path_weights],
            bst: vec![BranchStatus::NotFound; 1 << cfg.log_bst],
            tracker,
            index_fold,
            history: 0,
            spec_history: 0,
            spec_base: 0,
            inflight: VecDeque::new(),
            next_seq: 0,
            threshold: cfg.threshold,
            tc: 0,
            wmin,
            wmax,
            rng: SmallRng::seed_from_u64(cfg.seed),
            cfg,
        })
    }

    pub fn config(&self) -> &PerceptronConfig { &self.cfg }
    pub fn threshold(&self) -> i32 { self.threshold }
    pub fn threshold_counter(&self) -> i32 { self.tc }
    pub fn history(&self) -> u64 { self.history }
    pub fn spec_history(&self) -> u64 { self.spec_history }

    /// Number of speculated lookups still held for repair.
    pub fn pending(&self) -> usize { self.inflight.len() }
    pub fn tracker(&self) -> &HistoryTracker { &self.tracker }
    pub fn perceptron(&self, row: usize) -> Option<&Perceptron> { self.table.get(row) }
    pub fn perceptron_mut(&mut self, row: usize) -> Option<&mut Perceptron> {
        self.table.get_mut(row)
    }
    pub fn path_weight(&self, idx: usize) -> Option<i32> { self.path_weights.get(idx).copied() }

    pub fn storage_bits(&self) -> usize {
        let w = self.cfg.weight_bits as usize;
        self.table.len() * (self.cfg.history_length + 1) * w
            + self.path_weights.len() * w
            + self.bst.len() * 2
    }

    fn history_mask(&self) -> u64 {
        if self.cfg.history_length >= 64 {
            u64::MAX
        } else {
            (1 << self.cfg.history_length) - 1
        }
    }

    pub fn row_index(&self, addr: Addr) -> usize {
        let mut idx = (addr >> BRANCH_SHIFT) as usize;
        if let Some(f) = self.index_fold {
            idx ^= self.tracker.folded(f);
        }
        idx & (self.table.len() - 1)
    }

    fn bst_index(&self, addr: Addr) -> usize {
        ((addr >> BRANCH_SHIFT) as usize) & (self.bst.len() - 1)
    }

    pub fn status(&self, addr: Addr) -> BranchStatus {
        self.bst[self.bst_index(addr)]
    }

    /// Select a path weight for an older branch (`tag`) seen at `pos`.
    fn path_index(&self, addr: Addr, tag: u32, pos: u64, salt: u64) -> usize {
        let x = (addr >> BRANCH_SHIFT).wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ (tag as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f)
            ^ ((pos << 16) | salt).wrapping_mul(0x1656_67b1_9e37_79f9);
        (x >> (64 - self.cfg.log_path_weights)) as usize
    }

    /// The current point in speculative history, taken after the lookup
    /// of the branch which may later be recovered.
    pub fn checkpoint(&self) -> Option<SpecCheckpoint> {
        if self.cfg.speculative_history {
            Some(SpecCheckpoint { seq: self.next_seq })
        } else {
            None
        }
    }

    fn rebuild_spec_history(&mut self) {
        let skip = self.inflight.len().saturating_sub(64);
        self.spec_history = self.inflight.iter().skip(skip)
            .fold(self.spec_base, |h, e| (h << 1) | bool::from(e.dir) as u64);
    }

    fn retire(&mut self, e: InFlight) {
        self.spec_base = (self.spec_base << 1) | bool::from(e.dir) as u64;
    }

    /// Predict the direction of the branch at `addr`.
    pub fn lookup(&mut self, addr: Addr) -> (Outcome, PerceptronContext) {
        let row = self.row_index(addr);
        self.table[row].accesses += 1;

        let history = if self.cfg.speculative_history {
            self.spec_history
        } else {
            self.history
        } & self.history_mask();

        let mut sum = self.table[row].output(history);
        let mut path = Vec::with_capacity(self.cfg.rs_depth + self.cfg.filtered_len);

        for (rank, e) in self.tracker.recency().iter().take(self.cfg.rs_depth).enumerate() {
            let idx = self.path_index(addr, e.tag, rank as u64, RS_SALT);
            sum += self.path_weights[idx] * e.outcome.sign();
            path.push((idx, e.outcome));
        }

        let filtered = self.tracker
            .filtered_view(self.cfg.filtered_start, self.cfg.filtered_end)
            .take(self.cfg.filtered_len);
        for e in filtered {
            let bucket = (e.distance as u64 + 1).ilog2() as u64;
            let idx = self.path_index(addr, e.tag, bucket, FILTERED_SALT);
            sum += self.path_weights[idx] * e.outcome.sign();
            path.push((idx, e.outcome));
        }

        let output = Outcome::from(sum >= 0);
        let (prediction, used_bias) = match self.status(addr).bias() {
            Some(dir) if self.cfg.bias_filter => (dir, true),
            _ => (output, false),
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        if self.cfg.speculative_history {
            if self.inflight.len() == MAX_INFLIGHT {
                if let Some(e) = self.inflight.pop_front() {
                    self.retire(e);
                }
            }
            self.inflight.push_back(InFlight { seq, dir: prediction, resolved: false });
            self.spec_history = (self.spec_history << 1) | bool::from(prediction) as u64;
        }

        let ctx = PerceptronContext {
            row, history, path, sum, output, prediction, used_bias, seq,
        };
        (prediction, ctx)
    }

    /// Replace the direction speculated by the latest lookup, i.e. with the
    /// choice made by a combined predictor.
    pub fn speculate(&mut self, dir: Outcome) {
        if !self.cfg.speculative_history {
            return;
        }
        if let Some(e) = self.inflight.back_mut() {
            e.dir = dir;
            self.spec_history = (self.spec_history & !1) | bool::from(dir) as u64;
        }
    }

    fn validate(&self, ctx: &PerceptronContext) -> Result<(), BpredError> {
        if ctx.row >= self.table.len() {
            return Err(BpredError::ProtocolMisuse("perceptron row out of range"));
        }
        if ctx.path.iter().any(|(idx, _)| *idx >= self.path_weights.len()) {
            return Err(BpredError::ProtocolMisuse("path weight index out of range"));
        }
        Ok(())
    }

    /// Train with the resolved direction of a branch and commit it to
    /// global history.
    pub fn update(&mut self, ctx: &PerceptronContext, addr: Addr, outcome: Outcome)
        -> Result<(), BpredError>
    {
        self.validate(ctx)?;

        let mispredicted = ctx.output != outcome;
        let low_confidence = ctx.sum.abs() <= self.threshold;
        let mut train = mispredicted || low_confidence;

        // Branches predicted by their bias only occasionally train
        if train && ctx.used_bias {
            let mask = (1u64 << self.cfg.warmup_log2.min(63)) - 1;
            train = self.rng.gen::<u64>() & mask == 0;
        }

        let (lo, hi) = (self.wmin, self.wmax);
        if train {
            trace!("perceptron: train row {} sum {} outcome {:?}", ctx.row, ctx.sum, outcome);
            self.table[ctx.row].train(ctx.history, outcome, lo, hi);
            for &(idx, o) in ctx.path.iter() {
                let adj = if o == outcome { 1 } else { -1 };
                self.path_weights[idx] = (self.path_weights[idx] + adj).clamp(lo, hi);
            }
        } else if ctx.sum.abs() <= TRAIN_TH {
            self.table[ctx.row].train_bias(outcome, lo, hi);
        }

        self.adapt_threshold(mispredicted, low_confidence);

        // Commit
        let bst_idx = self.bst_index(addr);
        let status = self.bst[bst_idx].next(outcome);
        self.bst[bst_idx] = status;
        self.history = (self.history << 1) | bool::from(outcome) as u64;
        self.tracker.record(addr, outcome);
        if !self.cfg.bias_filter || status == BranchStatus::NonBiased {
            self.tracker.update_recency(addr, outcome);
        }

        // Correct the branch in place, and fold resolved branches at the
        // front of the window into the base history
        if self.cfg.speculative_history {
            if let Some(e) = self.inflight.iter_mut().find(|e| e.seq == ctx.seq) {
                e.dir = outcome;
                e.resolved = true;
            }
            while self.inflight.front().is_some_and(|e| e.resolved) {
                if let Some(e) = self.inflight.pop_front() {
                    self.retire(e);
                }
            }
            self.rebuild_spec_history();
        }
        Ok(())
    }

    /// Adaptive threshold from O-GEHL.
    fn adapt_threshold(&mut self, mispredicted: bool, low_confidence: bool) {
        if mispredicted {
            self.tc += 1;
            if self.tc >= TC_MAX {
                self.threshold += 1;
                self.tc = 0;
                debug!("perceptron: threshold raised to {}", self.threshold);
            }
        } else if low_confidence {
            self.tc -= 1;
            if self.tc <= TC_MIN {
                self.threshold = (self.threshold - 1).max(0);
                self.tc = 0;
                debug!("perceptron: threshold lowered to {}", self.threshold);
            }
        }
    }

    /// Discard speculative history written by lookups after `cp`.
    ///
    /// A branch keeps its predicted direction in speculative history until
    /// it is updated, which replaces it with the resolved direction at its
    /// own position.
    pub fn recover(&mut self, cp: &SpecCheckpoint) {
        if !self.cfg.speculative_history {
            return;
        }
        let keep = self.inflight.partition_point(|e| e.seq < cp.seq);
        self.inflight.truncate(keep);
        self.rebuild_spec_history();
        trace!("perceptron: recovered to seq {} ({} pending)", cp.seq, keep);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> PerceptronConfig {
        PerceptronConfig {
            num_perceptrons: 64,
            history_length: 12,
            ..PerceptronConfig::default()
        }
    }

    #[test]
    fn weights_saturate() {
        let mut p = Perceptron::new(4);
        for _ in 0..1000 {
            p.train(0b0101, Outcome::T, -128, 127);
        }
        assert_eq!(p.bias(), 127);
        assert_eq!(p.weights(), &[127, -128, 127, -128]);
        assert_eq!(p.output(0b0101), 127 + 127 + 128 + 127 + 128);
    }

    #[test]
    fn branch_status() {
        let s = BranchStatus::NotFound.next(Outcome::T);
        assert_eq!(s.bias(), Some(Outcome::T));
        assert_eq!(s.next(Outcome::T), BranchStatus::Taken);
        assert_eq!(s.next(Outcome::N), BranchStatus::NonBiased);
        assert_eq!(BranchStatus::NonBiased.next(Outcome::T).bias(), None);
    }

    #[test]
    fn biased_branch_uses_status() {
        let mut p = PerceptronPredictor::new(config()).unwrap();
        let (_, ctx) = p.lookup(0x100);
        assert!(!ctx.used_bias);
        p.update(&ctx, 0x100, Outcome::N).unwrap();
        let (pred, ctx) = p.lookup(0x100);
        assert!(ctx.used_bias);
        assert_eq!(pred, Outcome::N);
        // Biased branches stay out of the recency stack
        assert!(p.tracker().recency().is_empty());
        p.update(&ctx, 0x100, Outcome::T).unwrap();
        assert_eq!(p.status(0x100), BranchStatus::NonBiased);
        assert_eq!(p.tracker().recency().len(), 1);
    }

    #[test]
    fn learns_alternating_branch() {
        let mut p = PerceptronPredictor::new(config()).unwrap();
        let mut hits = 0;
        for i in 0..300 {
            let outcome = Outcome::from(i % 2 == 0);
            let (pred, ctx) = p.lookup(0x4400);
            if i >= 250 && pred == outcome {
                hits += 1;
            }
            p.update(&ctx, 0x4400, outcome).unwrap();
        }
        assert_eq!(hits, 50);
        assert_eq!(p.perceptron(p.row_index(0x4400)).map(|x| x.accesses()), Some(300));
    }

    #[test]
    fn threshold_adapts() {
        let mut p = PerceptronPredictor::new(config()).unwrap();
        let t = p.threshold();
        for _ in 0..TC_MAX {
            p.adapt_threshold(true, true);
        }
        assert_eq!(p.threshold(), t + 1);
        assert_eq!(p.threshold_counter(), 0);
        for _ in 0..(-TC_MIN) {
            p.adapt_threshold(false, true);
        }
        assert_eq!(p.threshold(), t);
        p.adapt_threshold(false, false);
        assert_eq!(p.threshold_counter(), 0);
    }

    #[test]
    fn stale_context_is_rejected() {
        let mut p = PerceptronPredictor::new(config()).unwrap();
        let (_, mut ctx) = p.lookup(0x100);
        ctx.row = 64;
        assert!(matches!(p.update(&ctx, 0x100, Outcome::T), Err(BpredError::ProtocolMisuse(_))));
    }

    #[test]
    fn masked_weights_are_ignored() {
        let mut p = Perceptron::new(4);
        p.set_mask(0b0011 | 0xf0);
        assert_eq!(p.mask(), 0b0011);
        for _ in 0..3 {
            p.train(0b1111, Outcome::T, -128, 127);
        }
        assert_eq!(p.weights(), &[3, 3, 0, 0]);
        assert_eq!(p.output(0b0000), 3 - 3 - 3);
        assert_eq!(p.output(0b1100), 3 - 3 - 3);
    }

    fn bit(o: Outcome) -> u64 { bool::from(o) as u64 }

    #[test]
    fn speculative_recover_then_update() {
        let cfg = PerceptronConfig { speculative_history: true, ..config() };
        let mut p = PerceptronPredictor::new(cfg).unwrap();

        let (pred, ctx) = p.lookup(0x200);
        let cp = p.checkpoint().unwrap();
        // A wrong-path branch
        let _ = p.lookup(0x300);
        assert_eq!((p.spec_history() >> 1) & 1, bit(pred));

        let actual = !pred;
        p.recover(&cp);
        assert_eq!(p.spec_history(), bit(pred));
        p.update(&ctx, 0x200, actual).unwrap();
        assert_eq!(p.spec_history(), bit(actual));
        assert_eq!(p.history(), bit(actual));
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn speculative_update_then_recover() {
        let cfg = PerceptronConfig { speculative_history: true, ..config() };
        let mut p = PerceptronPredictor::new(cfg).unwrap();

        let (pred, ctx) = p.lookup(0x200);
        let cp = p.checkpoint().unwrap();
        let _ = p.lookup(0x300);
        let actual = !pred;
        p.update(&ctx, 0x200, actual).unwrap();
        p.recover(&cp);
        assert_eq!(p.spec_history(), bit(actual));

        // Later lookups are unaffected by the repair
        let (_, ctx) = p.lookup(0x204);
        assert_eq!(ctx.history & 1, bit(actual));
    }

    #[test]
    fn late_update_keeps_program_order() {
        let cfg = PerceptronConfig { speculative_history: true, ..config() };
        let mut p = PerceptronPredictor::new(cfg).unwrap();

        let (pred_a, a) = p.lookup(0x200);
        let cp = p.checkpoint().unwrap();
        let _ = p.lookup(0x300);
        p.recover(&cp);

        // Correct-path branch fetched before the first one is updated
        let (pred_c, c) = p.lookup(0x400);
        let actual = !pred_a;
        p.update(&a, 0x200, actual).unwrap();
        assert_eq!(p.spec_history(), (bit(actual) << 1) | bit(pred_c));
        p.update(&c, 0x400, pred_c).unwrap();
        assert_eq!(p.spec_history(), p.history());
    }

    #[test]
    fn nested_recovers() {
        let cfg = PerceptronConfig { speculative_history: true, ..config() };
        let mut p = PerceptronPredictor::new(cfg).unwrap();

        let (_, a) = p.lookup(0x200);
        let cpa = p.checkpoint().unwrap();
        let _ = p.lookup(0x300);
        p.recover(&cpa);
        let (_, b) = p.lookup(0x204);
        let cpb = p.checkpoint().unwrap();
        let _ = p.lookup(0x304);
        p.recover(&cpb);
        assert_eq!(p.pending(), 2);

        p.update(&a, 0x200, Outcome::T).unwrap();
        p.update(&b, 0x204, Outcome::T).unwrap();
        assert_eq!(p.history(), 0b11);
        assert_eq!(p.spec_history(), 0b11);
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn pending_lookups_are_bounded() {
        let cfg = PerceptronConfig { speculative_history: true, ..config() };
        let mut p = PerceptronPredictor::new(cfg).unwrap();
        let mut expected = 0u64;
        for i in 0..(MAX_INFLIGHT as u64 + 100) {
            let (pred, _) = p.lookup(0x200 + (i % 16) * 4);
            expected = (expected << 1) | bit(pred);
        }
        assert_eq!(p.pending(), MAX_INFLIGHT);
        assert_eq!(p.spec_history(), expected);
    }
}
