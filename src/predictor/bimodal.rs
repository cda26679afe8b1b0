
use crate::error::{BpredError, ConfigError};
use crate::predictor::*;
use crate::{Addr, Outcome};

/// A direct-mapped table of 2-bit counters indexed by branch address.
///
/// Branches which hash to the same entry share it.
#[derive(Clone, Debug)]
pub struct Bimodal {
    table: CounterTable,
}
impl Bimodal {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if !size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo { what: "bimodal table", size });
        }
        Ok(Self { table: CounterTable::new(size, SaturatingCounterConfig::default()) })
    }

    pub fn size(&self) -> usize { self.table.size() }

    pub fn index(&self, addr: Addr) -> usize {
        bimodal_index(addr, self.table.size())
    }

    /// Predict the direction of the branch at `addr`, also returning the
    /// index of the counter used.
    pub fn lookup(&self, addr: Addr) -> (Outcome, usize) {
        let idx = self.index(addr);
        (self.table.get_entry(idx).predict(), idx)
    }

    /// Train the counter found by [`Bimodal::lookup`].
    pub fn update(&mut self, idx: usize, outcome: Outcome) -> Result<(), BpredError> {
        self.table.get_mut(idx)
            .ok_or(BpredError::ProtocolMisuse("bimodal counter index out of range"))?
            .update(outcome);
        Ok(())
    }

    pub fn counter(&self, idx: usize) -> Option<&SaturatingCounter> {
        self.table.get(idx)
    }
}
