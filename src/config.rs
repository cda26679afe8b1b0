//! Construction parameters for a [`crate::BranchPredictor`].

use std::io::{self, Write};

use serde::Serialize;

use crate::error::ConfigError;
use crate::history::GHL;

/// The kind of predictor occupying a direction-prediction slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PredictorClass {
    /// Combined predictor (McFarling)
    Combined,
    /// Two-level correlating predictor with 2-bit counters
    TwoLevel,
    /// Direct-mapped table of 2-bit saturating counters
    Bimodal,
    /// Static predict taken
    StaticTaken,
    /// Static predict not-taken
    StaticNotTaken,
    /// Perceptron predictor
    Perceptron,
}
impl PredictorClass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Combined => "comb",
            Self::TwoLevel => "2lev",
            Self::Bimodal => "bimod",
            Self::StaticTaken => "taken",
            Self::StaticNotTaken => "nottaken",
            Self::Perceptron => "perceptron",
        }
    }

    /// Returns 'true' if this class keeps no state besides the BTB and RAS.
    pub fn is_static(&self) -> bool {
        matches!(self, Self::StaticTaken | Self::StaticNotTaken)
    }
}

/// The two direction predictors arbitrated by a combined predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CombinedPair {
    /// Used while the meta counter predicts "first"
    pub first: PredictorClass,
    /// Used while the meta counter predicts "second"
    pub second: PredictorClass,
}
impl Default for CombinedPair {
    fn default() -> Self {
        Self { first: PredictorClass::Bimodal, second: PredictorClass::TwoLevel }
    }
}

/// Parameters for a [`crate::PerceptronPredictor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PerceptronConfig {
    /// Number of perceptrons (rows in the weight table)
    pub num_perceptrons: usize,

    /// Number of bits per weight
    pub weight_bits: u32,

    /// Number of global history bits correlated by each perceptron
    pub history_length: usize,

    /// Length of global history folded into the perceptron index
    /// (zero indexes with the branch address alone)
    pub index_history: usize,

    /// Number of recency-stack entries used for prediction
    pub rs_depth: usize,

    /// Number of filtered-history entries used for prediction
    pub filtered_len: usize,

    /// Filtered history covers branches at distances in `start..end`
    pub filtered_start: usize,
    pub filtered_end: usize,

    /// log2 of the number of path weights
    pub log_path_weights: u32,

    /// log2 of the number of branch status table entries
    pub log_bst: u32,

    /// Predict branches that have only ever gone one way with their bias,
    /// and keep them out of the recency stack
    pub bias_filter: bool,

    /// Biased branches still train the weights with probability
    /// `1 / 2^warmup_log2`
    pub warmup_log2: u32,

    /// Predict with a speculatively-updated copy of global history
    pub speculative_history: bool,

    /// Initial adaptive training threshold
    pub threshold: i32,

    /// Seed for the pseudo-random number generator
    pub seed: u64,
}
impl Default for PerceptronConfig {
    fn default() -> Self {
        let history_length = 32;
        Self {
            num_perceptrons: 256,
            weight_bits: 8,
            history_length,
            index_history: 0,
            rs_depth: 16,
            filtered_len: 8,
            filtered_start: EXTRA_PHIST_START_DIST,
            filtered_end: EXTRA_PHIST_END_DIST,
            log_path_weights: 12,
            log_bst: 12,
            bias_filter: true,
            warmup_log2: 3,
            speculative_history: false,
            threshold: Self::initial_threshold(history_length),
            seed: 1,
        }
    }
}
impl PerceptronConfig {
    /// The training threshold suggested by Jiménez and Lin for a given
    /// history length.
    pub fn initial_threshold(history_length: usize) -> i32 {
        (1.93 * history_length as f64 + 14.0) as i32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.num_perceptrons.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                what: "perceptron table", size: self.num_perceptrons
            });
        }
        if !(2..=16).contains(&self.weight_bits) {
            return Err(ConfigError::WeightBits(self.weight_bits));
        }
        if !(1..=64).contains(&self.history_length) {
            return Err(ConfigError::HistoryLength(self.history_length));
        }
        if self.filtered_start > self.filtered_end || self.filtered_end > GHL
            || self.index_history > GHL
        {
            return Err(ConfigError::HistoryWindow {
                start: self.filtered_start,
                end: self.filtered_end.max(self.index_history),
                capacity: GHL,
            });
        }
        for (what, len) in [("recency stack", self.rs_depth), ("filtered view", self.filtered_len)] {
            if len > GHL {
                return Err(ConfigError::PathEntries { what, len, max: GHL });
            }
        }
        if self.log_path_weights == 0 || self.log_path_weights > 30 {
            return Err(ConfigError::TableBits {
                what: "path weight table", bits: self.log_path_weights
            });
        }
        if self.log_bst > 30 {
            return Err(ConfigError::TableBits {
                what: "branch status table", bits: self.log_bst
            });
        }
        Ok(())
    }
}

/// Filtered history starts this deep in global history.
pub const EXTRA_PHIST_START_DIST: usize = 64;

/// Filtered history ends this deep in global history.
pub const EXTRA_PHIST_END_DIST: usize = 1024;

/// Configuration for building a [`crate::BranchPredictor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PredictorConfig {
    pub class: PredictorClass,

    /// Bimodal table size
    pub bimod_size: usize,

    /// Level-1 table size (number of history registers)
    pub l1_size: usize,

    /// Level-2 table size (number of counters)
    pub l2_size: usize,

    /// Meta predictor table size
    pub meta_size: usize,

    /// History register width
    pub shift_width: u32,

    /// XOR history with the branch address
    pub xor: bool,

    /// Number of sets in the BTB
    pub btb_sets: usize,

    /// BTB associativity
    pub btb_assoc: usize,

    /// Number of entries in the return-address stack
    pub ras_size: usize,

    /// Components arbitrated by a combined predictor
    pub combined: CombinedPair,

    /// Used by perceptron slots
    pub perceptron: PerceptronConfig,
}
impl Default for PredictorConfig {
    fn default() -> Self {
        Self::new(PredictorClass::Bimodal)
    }
}
impl PredictorConfig {
    /// A configuration of the given class with conventional table sizes.
    pub fn new(class: PredictorClass) -> Self {
        Self {
            class,
            bimod_size: 2048,
            l1_size: 1,
            l2_size: 1024,
            meta_size: 1024,
            shift_width: 8,
            xor: false,
            btb_sets: 512,
            btb_assoc: 4,
            ras_size: 8,
            combined: CombinedPair::default(),
            perceptron: PerceptronConfig::default(),
        }
    }

    /// The classes occupying each direction slot, in slot order.
    pub fn components(&self) -> Vec<PredictorClass> {
        match self.class {
            PredictorClass::Combined => vec![self.combined.first, self.combined.second],
            class => vec![class],
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.class == PredictorClass::Combined {
            for c in [self.combined.first, self.combined.second] {
                if !matches!(c, PredictorClass::Bimodal
                    | PredictorClass::TwoLevel
                    | PredictorClass::Perceptron)
                {
                    return Err(ConfigError::CombinedComponent(c));
                }
            }
            check_pow2("meta table", self.meta_size)?;
        }

        for c in self.components() {
            match c {
                PredictorClass::Bimodal => check_pow2("bimodal table", self.bimod_size)?,
                PredictorClass::TwoLevel => {
                    check_pow2("level-1", self.l1_size)?;
                    check_pow2("level-2", self.l2_size)?;
                    if !(1..=30).contains(&self.shift_width) {
                        return Err(ConfigError::ShiftWidth(self.shift_width));
                    }
                },
                PredictorClass::Perceptron => self.perceptron.validate()?,
                _ => {},
            }
        }

        // Static predictors get by without a BTB
        if self.class.is_static() {
            if self.btb_sets != 0 {
                check_pow2("BTB set count", self.btb_sets)?;
                check_pow2("BTB associativity", self.btb_assoc)?;
            }
        } else {
            check_pow2("BTB set count", self.btb_sets)?;
            check_pow2("BTB associativity", self.btb_assoc)?;
        }

        if self.ras_size != 0 && !self.ras_size.is_power_of_two() {
            return Err(ConfigError::ZeroOrPowerOfTwo {
                what: "return-address stack", size: self.ras_size
            });
        }
        Ok(())
    }

    /// Print a human-readable description of this configuration.
    pub fn write_config(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "bpred: {}", self.class.name())?;
        for (slot, c) in self.components().iter().enumerate() {
            write!(w, "  pred_dir{}: {}: ", slot + 1, c.name())?;
            match c {
                PredictorClass::Bimodal => {
                    writeln!(w, "{} entries, direct-mapped", self.bimod_size)?;
                },
                PredictorClass::TwoLevel => {
                    writeln!(w, "{} l1-sz, {} bits/ent, {}, {} l2-sz, direct-mapped",
                        self.l1_size, self.shift_width,
                        if self.xor { "xor" } else { "no-xor" },
                        self.l2_size,
                    )?;
                },
                PredictorClass::Perceptron => {
                    let p = &self.perceptron;
                    writeln!(w, "{} perceptrons, {} bits/weight, {} history bits, \
                        threshold {}, {} rs entries, filtered {}..{} ({} entries)",
                        p.num_perceptrons, p.weight_bits, p.history_length,
                        p.threshold, p.rs_depth, p.filtered_start,
                        p.filtered_end, p.filtered_len,
                    )?;
                },
                _ => writeln!(w, "static")?,
            }
        }
        if self.class == PredictorClass::Combined {
            writeln!(w, "  meta: {} entries, direct-mapped", self.meta_size)?;
        }
        writeln!(w, "  btb: {} sets x {} associativity", self.btb_sets, self.btb_assoc)?;
        writeln!(w, "  ret_stack: {} entries", self.ras_size)?;
        Ok(())
    }
}

fn check_pow2(what: &'static str, size: usize) -> Result<(), ConfigError> {
    if size.is_power_of_two() {
        Ok(())
    } else {
        Err(ConfigError::NotPowerOfTwo { what, size })
    }
}
