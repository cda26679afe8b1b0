//! Direction predictors and the tables they are built from.

pub mod bimodal;
pub mod btb;
pub mod counter;
pub mod meta;
pub mod perceptron;
pub mod ras;
pub mod simple;
pub mod table;
pub mod twolevel;

pub use bimodal::*;
pub use btb::*;
pub use counter::*;
pub use meta::*;
pub use perceptron::*;
pub use ras::*;
pub use simple::*;
pub use table::*;
pub use twolevel::*;

use crate::config::{PredictorClass, PredictorConfig};
use crate::error::{BpredError, ConfigError};
use crate::{Addr, Outcome};

/// Interface to a table of predictors.
pub trait PredictorTable {
    /// The type of input to the table used to form an index.
    type Input;

    /// The type of entry in the table.
    type Entry;

    /// Returns the number of entries in the table.
    fn size(&self) -> usize;

    /// Given some input, return the corresponding index into the table.
    fn get_index(&self, input: Self::Input) -> usize;

    /// Returns a reference to an entry in the table.
    fn get_entry(&self, input: Self::Input) -> &Self::Entry;

    /// Returns a mutable reference to an entry in the table.
    fn get_entry_mut(&mut self, input: Self::Input) -> &mut Self::Entry;

    /// Returns a mask corresponding to the number of entries in the table.
    fn index_mask(&self) -> usize {
        assert!(self.size().is_power_of_two());
        self.size() - 1
    }
}

/// Identifies the state used by a direction prediction, so that the same
/// state can be trained when the branch resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirCell {
    /// Index of a saturating counter
    Counter(usize),
    Perceptron(Box<PerceptronContext>),
    /// Static predictors have no state
    Static,
}

/// A direction prediction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirLookup {
    pub prediction: Outcome,
    pub cell: DirCell,
}

/// A predictor occupying one direction-prediction slot.
pub enum DirectionPredictor {
    Bimodal(Bimodal),
    TwoLevel(TwoLevel),
    Perceptron(Box<PerceptronPredictor>),
    Static(StaticPredictor),
}
impl DirectionPredictor {
    pub fn build(class: PredictorClass, cfg: &PredictorConfig) -> Result<Self, ConfigError> {
        Ok(match class {
            PredictorClass::Bimodal => Self::Bimodal(Bimodal::new(cfg.bimod_size)?),
            PredictorClass::TwoLevel => Self::TwoLevel(
                TwoLevel::new(cfg.l1_size, cfg.l2_size, cfg.shift_width, cfg.xor)?
            ),
            PredictorClass::Perceptron => Self::Perceptron(
                Box::new(PerceptronPredictor::new(cfg.perceptron.clone())?)
            ),
            PredictorClass::StaticTaken => Self::Static(StaticPredictor::taken()),
            PredictorClass::StaticNotTaken => Self::Static(StaticPredictor::not_taken()),
            PredictorClass::Combined => return Err(ConfigError::CombinedComponent(class)),
        })
    }

    pub fn class(&self) -> PredictorClass {
        match self {
            Self::Bimodal(_) => PredictorClass::Bimodal,
            Self::TwoLevel(_) => PredictorClass::TwoLevel,
            Self::Perceptron(_) => PredictorClass::Perceptron,
            Self::Static(s) => match s.predict() {
                Outcome::T => PredictorClass::StaticTaken,
                Outcome::N => PredictorClass::StaticNotTaken,
            },
        }
    }

    pub fn lookup(&mut self, addr: Addr) -> DirLookup {
        match self {
            Self::Bimodal(p) => {
                let (prediction, idx) = p.lookup(addr);
                DirLookup { prediction, cell: DirCell::Counter(idx) }
            },
            Self::TwoLevel(p) => {
                let (prediction, idx) = p.lookup(addr);
                DirLookup { prediction, cell: DirCell::Counter(idx) }
            },
            Self::Perceptron(p) => {
                let (prediction, ctx) = p.lookup(addr);
                DirLookup { prediction, cell: DirCell::Perceptron(Box::new(ctx)) }
            },
            Self::Static(p) => DirLookup { prediction: p.predict(), cell: DirCell::Static },
        }
    }

    /// Train the state identified by `cell` with the resolved direction.
    pub fn update(&mut self, cell: &DirCell, addr: Addr, outcome: Outcome)
        -> Result<(), BpredError>
    {
        match (self, cell) {
            (Self::Bimodal(p), DirCell::Counter(idx)) => p.update(*idx, outcome),
            (Self::TwoLevel(p), DirCell::Counter(idx)) => p.update(*idx, addr, outcome),
            (Self::Perceptron(p), DirCell::Perceptron(ctx)) => p.update(ctx, addr, outcome),
            (Self::Static(_), DirCell::Static) => Ok(()),
            _ => Err(BpredError::ProtocolMisuse("direction cell does not match predictor")),
        }
    }

    /// Record the direction finally predicted for the latest lookup.
    pub fn speculate(&mut self, dir: Outcome) {
        if let Self::Perceptron(p) = self {
            p.speculate(dir);
        }
    }

    pub fn checkpoint(&self) -> Option<SpecCheckpoint> {
        match self {
            Self::Perceptron(p) => p.checkpoint(),
            _ => None,
        }
    }

    pub fn recover(&mut self, cp: &SpecCheckpoint) {
        if let Self::Perceptron(p) = self {
            p.recover(cp);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_each_class() {
        let cfg = PredictorConfig::default();
        for class in [
            PredictorClass::Bimodal, PredictorClass::TwoLevel, PredictorClass::Perceptron,
            PredictorClass::StaticTaken, PredictorClass::StaticNotTaken,
        ] {
            let p = DirectionPredictor::build(class, &cfg).unwrap();
            assert_eq!(p.class(), class);
        }
        assert!(DirectionPredictor::build(PredictorClass::Combined, &cfg).is_err());
    }

    #[test]
    fn mismatched_cell() {
        let cfg = PredictorConfig::default();
        let mut bimod = DirectionPredictor::build(PredictorClass::Bimodal, &cfg).unwrap();
        let mut perc = DirectionPredictor::build(PredictorClass::Perceptron, &cfg).unwrap();
        let cell = perc.lookup(0x40).cell;
        assert!(matches!(bimod.update(&cell, 0x40, Outcome::T),
            Err(BpredError::ProtocolMisuse(_))));
        let cell = bimod.lookup(0x40).cell;
        assert!(perc.update(&cell, 0x40, Outcome::T).is_err());
        assert!(bimod.update(&cell, 0x40, Outcome::T).is_ok());
    }
}
