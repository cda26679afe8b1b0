//! The branch predictor facade.
//!
//! A [BranchPredictor] combines a direction unit (one predictor, or two
//! arbitrated by a meta predictor) with a branch target buffer and a
//! return-address stack.
//!
//! The host probes the predictor at fetch with [BranchPredictor::lookup].
//! Once the branch resolves, the [UpdateToken] from the lookup is handed
//! back to [BranchPredictor::update] to train exactly the state which made
//! the prediction. After a misprediction, [BranchPredictor::recover] uses
//! the [RecoverPoint] from the lookup to rewind the return-address stack
//! and any speculative history.

use std::io;

use log::{debug, trace};

use crate::branch::{BranchKind, BranchOp};
use crate::config::{PredictorClass, PredictorConfig};
use crate::error::{BpredError, ConfigError, Result};
use crate::predictor::*;
use crate::stats::{PredictorStats, StatSink};
use crate::{Addr, Outcome, INST_BYTES};

/// A predicted direction and target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prediction {
    pub taken: bool,

    /// [None] when the target is unknown (i.e. a BTB miss)
    pub target: Option<Addr>,
}
impl Prediction {
    pub fn not_taken() -> Self { Self { taken: false, target: None } }
}

/// Directions predicted by each part of the direction unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PredictedDirs {
    /// The return-address stack provided the target
    pub ras: bool,

    /// Prediction of the first (or only) direction predictor
    pub first: bool,

    /// Prediction of the second direction predictor
    pub second: bool,

    /// The meta predictor chose the second direction predictor
    pub meta: bool,
}

/// The state used by one lookup, consumed when the branch is resolved.
#[derive(Debug, PartialEq, Eq)]
pub struct UpdateToken {
    class: PredictorClass,
    first: Option<DirCell>,
    second: Option<DirCell>,
    meta: Option<usize>,
    dirs: PredictedDirs,
}
impl UpdateToken {
    fn new(class: PredictorClass) -> Self {
        Self { class, first: None, second: None, meta: None, dirs: PredictedDirs::default() }
    }

    pub fn class(&self) -> PredictorClass { self.class }
    pub fn dirs(&self) -> PredictedDirs { self.dirs }

    /// Returns 'true' if a direction predictor was consulted.
    pub fn has_direction(&self) -> bool { self.first.is_some() }
}

/// Speculative state to restore after a misprediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverPoint {
    /// Top of the return-address stack before the lookup
    pub tos: usize,

    /// Speculative history checkpoints for each direction predictor, taken
    /// after the lookup
    pub first: Option<SpecCheckpoint>,
    pub second: Option<SpecCheckpoint>,
}

/// Everything returned by [BranchPredictor::lookup].
#[derive(Debug, PartialEq, Eq)]
pub struct Lookup {
    pub prediction: Prediction,
    pub token: UpdateToken,
    pub recover: RecoverPoint,
}

/// Predicts the direction of conditional branches.
pub enum DirectionUnit {
    Single(DirectionPredictor),
    Combined {
        first: DirectionPredictor,
        second: DirectionPredictor,
        meta: MetaPredictor,
    },
}
impl DirectionUnit {
    pub fn build(cfg: &PredictorConfig) -> std::result::Result<Self, ConfigError> {
        Ok(match cfg.class {
            PredictorClass::Combined => Self::Combined {
                first: DirectionPredictor::build(cfg.combined.first, cfg)?,
                second: DirectionPredictor::build(cfg.combined.second, cfg)?,
                meta: MetaPredictor::new(cfg.meta_size)?,
            },
            class => Self::Single(DirectionPredictor::build(class, cfg)?),
        })
    }

    fn checkpoints(&self) -> (Option<SpecCheckpoint>, Option<SpecCheckpoint>) {
        match self {
            Self::Single(p) => (p.checkpoint(), None),
            Self::Combined { first, second, .. } => (first.checkpoint(), second.checkpoint()),
        }
    }

    /// Predict a conditional branch, filling in the direction state of
    /// `token`.
    fn lookup(&mut self, addr: Addr, token: &mut UpdateToken) -> Outcome {
        match self {
            Self::Single(p) => {
                let res = p.lookup(addr);
                token.dirs.first = res.prediction.into();
                token.first = Some(res.cell);
                res.prediction
            },
            Self::Combined { first, second, meta } => {
                let a = first.lookup(addr);
                let b = second.lookup(addr);
                let (choice, midx) = meta.lookup(addr);
                token.dirs.first = a.prediction.into();
                token.dirs.second = b.prediction.into();
                token.dirs.meta = choice == Chooser::Second;
                token.first = Some(a.cell);
                token.second = Some(b.cell);
                token.meta = Some(midx);
                let dir = match choice {
                    Chooser::First => a.prediction,
                    Chooser::Second => b.prediction,
                };
                first.speculate(dir);
                second.speculate(dir);
                dir
            },
        }
    }

    fn update(&mut self, token: &UpdateToken, addr: Addr, outcome: Outcome) -> Result<()> {
        match self {
            Self::Single(p) => {
                let cell = token.first.as_ref()
                    .ok_or(BpredError::ProtocolMisuse("token has no direction state"))?;
                p.update(cell, addr, outcome)
            },
            Self::Combined { first, second, meta } => {
                let (Some(a), Some(b), Some(midx)) = (&token.first, &token.second, token.meta)
                else {
                    return Err(BpredError::ProtocolMisuse("token has no combined direction state"));
                };
                first.update(a, addr, outcome)?;
                second.update(b, addr, outcome)?;
                meta.update(midx,
                    Outcome::from(token.dirs.first),
                    Outcome::from(token.dirs.second),
                    outcome,
                )
            },
        }
    }

    fn recover(&mut self, point: &RecoverPoint) {
        match self {
            Self::Single(p) => {
                if let Some(cp) = &point.first { p.recover(cp); }
            },
            Self::Combined { first, second, .. } => {
                if let Some(cp) = &point.first { first.recover(cp); }
                if let Some(cp) = &point.second { second.recover(cp); }
            },
        }
    }
}

/// A complete branch prediction unit.
pub struct BranchPredictor<O: BranchOp = BranchKind> {
    cfg: PredictorConfig,
    dir: DirectionUnit,
    btb: Btb<O>,
    ras: ReturnStack,
    stats: PredictorStats,
}
impl <O: BranchOp> BranchPredictor<O> {
    pub fn new(cfg: PredictorConfig) -> Result<Self> {
        cfg.validate()?;
        let dir = DirectionUnit::build(&cfg)?;
        let btb = Btb::new(cfg.btb_sets, cfg.btb_assoc);
        let ras = ReturnStack::new(cfg.ras_size);
        debug!("bpred: created {} predictor ({} BTB sets x {}, {} RAS entries)",
            cfg.class.name(), cfg.btb_sets, cfg.btb_assoc, cfg.ras_size);
        Ok(Self { cfg, dir, btb, ras, stats: PredictorStats::default() })
    }

    /// Create a predictor from the classic set of construction parameters.
    /// Perceptron and combined-pair parameters take their defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        class: PredictorClass,
        bimod_size: usize,
        l1_size: usize,
        l2_size: usize,
        meta_size: usize,
        shift_width: u32,
        xor: bool,
        btb_sets: usize,
        btb_assoc: usize,
        ras_size: usize,
    ) -> Result<Self> {
        Self::new(PredictorConfig {
            bimod_size, l1_size, l2_size, meta_size, shift_width, xor,
            btb_sets, btb_assoc, ras_size,
            ..PredictorConfig::new(class)
        })
    }

    pub fn config(&self) -> &PredictorConfig { &self.cfg }
    pub fn class(&self) -> PredictorClass { self.cfg.class }
    pub fn direction(&self) -> &DirectionUnit { &self.dir }
    pub fn btb(&self) -> &Btb<O> { &self.btb }
    pub fn ras(&self) -> &ReturnStack { &self.ras }

    /// Predict the instruction at `addr`.
    ///
    /// `static_target` is the target encoded in the instruction (if any).
    /// Non-control instructions are predicted not-taken and leave no state
    /// behind.
    pub fn lookup(&mut self, addr: Addr, static_target: Addr, op: O,
        is_call: bool, is_return: bool) -> Lookup
    {
        let mut token = UpdateToken::new(self.cfg.class);
        let mut recover = RecoverPoint { tos: self.ras.tos(), first: None, second: None };

        if !op.is_control() {
            return Lookup { prediction: Prediction::not_taken(), token, recover };
        }
        self.stats.lookups += 1;

        let mut dir = Outcome::T;
        if op.is_conditional() {
            match self.cfg.class {
                PredictorClass::StaticTaken => {
                    token.dirs.first = true;
                    let prediction = Prediction { taken: true, target: Some(static_target) };
                    return Lookup { prediction, token, recover };
                },
                PredictorClass::StaticNotTaken => {
                    let prediction = Prediction {
                        taken: false, target: Some(addr.wrapping_add(INST_BYTES))
                    };
                    return Lookup { prediction, token, recover };
                },
                _ => dir = self.dir.lookup(addr, &mut token),
            }
        }
        // Recovery keeps this branch in speculative history
        (recover.first, recover.second) = self.dir.checkpoints();

        // Returns pop, and calls push a return address
        let (tos, ras_target) = self.ras.lookup(is_call, is_return, addr);
        recover.tos = tos;
        if self.ras.is_enabled() {
            if is_return {
                self.stats.ras_pops += 1;
                token.dirs.ras = true;
                let prediction = Prediction { taken: true, target: ras_target };
                return Lookup { prediction, token, recover };
            }
            if is_call {
                self.stats.ras_pushes += 1;
            }
        }

        let btb_target = self.btb.lookup(addr);
        if self.btb.is_enabled() {
            if btb_target.is_some() {
                self.stats.btb_hits += 1;
            } else {
                self.stats.btb_misses += 1;
            }
        }

        let prediction = if op.is_unconditional() {
            Prediction { taken: true, target: btb_target }
        } else if dir == Outcome::T {
            Prediction { taken: true, target: btb_target }
        } else {
            Prediction::not_taken()
        };
        Lookup { prediction, token, recover }
    }

    /// Train the predictor with the resolved branch at `addr`.
    ///
    /// `pred_taken` is the predicted direction, and `correct` is 'true' when
    /// the predicted target matched the resolved `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn update(&mut self, token: UpdateToken, addr: Addr, target: Addr,
        taken: bool, pred_taken: bool, correct: bool, op: O) -> Result<()>
    {
        if token.class != self.cfg.class {
            return Err(BpredError::ProtocolMisuse("token was issued by another predictor class"));
        }
        if !op.is_control() {
            return Ok(());
        }

        self.stats.updates += 1;
        if correct {
            self.stats.addr_hits += 1;
        }
        if pred_taken == taken {
            self.stats.dir_hits += 1;
        } else {
            self.stats.misses += 1;
        }

        let dirs = token.dirs;
        if dirs.ras {
            self.stats.used_ras += 1;
            if correct {
                self.stats.ras_hits += 1;
            }
        } else if op.is_conditional() {
            if dirs.meta {
                self.stats.used_second += 1;
            } else {
                self.stats.used_first += 1;
            }
        }

        if op.is_indirect() {
            self.stats.jr_seen += 1;
            if correct {
                self.stats.jr_hits += 1;
            }
            if !dirs.ras {
                self.stats.jr_non_ras_seen += 1;
                if correct {
                    self.stats.jr_non_ras_hits += 1;
                }
            }
        }

        // Nothing else to learn for static predictors, or for returns
        // predicted by the return-address stack
        if self.cfg.class.is_static() || dirs.ras {
            return Ok(());
        }

        if op.is_conditional() {
            self.dir.update(&token, addr, Outcome::from(taken))?;
        }

        // Only taken branches are entered in the BTB
        if taken {
            self.btb.update(addr, op, target);
        }
        Ok(())
    }

    /// Rewind speculative state after the branch at `addr` was mispredicted.
    ///
    /// Trained counters and weights are never rolled back.
    pub fn recover(&mut self, addr: Addr, point: RecoverPoint) {
        trace!("bpred: recover at {:#x} (tos {})", addr, point.tos);
        self.ras.recover(point.tos);
        self.dir.recover(&point);
    }

    pub fn stats(&self) -> &PredictorStats { &self.stats }

    /// Clear all statistics, i.e. after a warm-up period.
    pub fn reset_stats(&mut self) {
        self.stats = PredictorStats::default();
    }

    /// Register all statistics with a host statistics database.
    pub fn register_stats(&self, sink: &mut impl StatSink) {
        let prefix = format!("bpred_{}", self.cfg.class.name());
        self.stats.register(&prefix, sink);
    }

    /// Print the construction parameters.
    pub fn write_config(&self, w: &mut impl io::Write) -> io::Result<()> {
        self.cfg.write_config(w)
    }
}
