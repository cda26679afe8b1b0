
use crate::error::{BpredError, ConfigError};
use crate::predictor::*;
use crate::{Addr, Outcome};

/// Which component of a combined predictor provided a prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chooser {
    First,
    Second,
}

/// The chooser table of a McFarling-style combined predictor.
///
/// Each 2-bit counter tracks which of two component predictors has been
/// more accurate for the branches mapping onto it. Counters at or above 2
/// select the second component.
#[derive(Clone, Debug)]
pub struct MetaPredictor {
    table: CounterTable,
}
impl MetaPredictor {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if !size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo { what: "meta table", size });
        }
        Ok(Self { table: CounterTable::new(size, SaturatingCounterConfig::default()) })
    }

    pub fn size(&self) -> usize { self.table.size() }

    /// Pick a component for the branch at `addr`, also returning the index
    /// of the chooser counter.
    pub fn lookup(&self, addr: Addr) -> (Chooser, usize) {
        let idx = bimodal_index(addr, self.table.size());
        let choice = match self.table.get_entry(idx).predict() {
            Outcome::T => Chooser::Second,
            Outcome::N => Chooser::First,
        };
        (choice, idx)
    }

    /// Move the chooser counter toward whichever component was correct.
    /// Nothing changes when both components agreed.
    pub fn update(&mut self, idx: usize, first: Outcome, second: Outcome, outcome: Outcome)
        -> Result<(), BpredError>
    {
        let ctr = self.table.get_mut(idx)
            .ok_or(BpredError::ProtocolMisuse("meta counter index out of range"))?;
        if first != second {
            if second == outcome {
                ctr.increment();
            } else {
                ctr.decrement();
            }
        }
        Ok(())
    }

    pub fn counter(&self, idx: usize) -> Option<&SaturatingCounter> {
        self.table.get(idx)
    }
}
