//! Two-level adaptive predictor.
//!
//! A level-1 table of branch history shift registers selects (along with
//! the branch address) a counter in the level-2 pattern table. Global and
//! per-address variants (GAg, GAp, PAg, PAp) are all choices of the level-1
//! size and the number of address bits used in the level-2 index.

use crate::error::{BpredError, ConfigError};
use crate::predictor::*;
use crate::{Addr, Outcome, BRANCH_SHIFT};

#[derive(Clone, Debug)]
pub struct TwoLevel {
    /// Level-1 history shift registers
    l1: Vec<u32>,

    /// Level-2 pattern history table
    l2: CounterTable,

    /// History register width [in bits]
    shift_width: u32,

    /// XOR history with the branch address instead of concatenating
    xor: bool,
}
impl TwoLevel {
    pub fn new(l1_size: usize, l2_size: usize, shift_width: u32, xor: bool)
        -> Result<Self, ConfigError>
    {
        if !l1_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo { what: "level-1", size: l1_size });
        }
        if !l2_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo { what: "level-2", size: l2_size });
        }
        if !(1..=30).contains(&shift_width) {
            return Err(ConfigError::ShiftWidth(shift_width));
        }
        Ok(Self {
            l1: vec![0; l1_size],
            l2: CounterTable::new(l2_size, SaturatingCounterConfig::default()),
            shift_width,
            xor,
        })
    }

    fn history_mask(&self) -> u64 {
        (1 << self.shift_width) - 1
    }

    pub fn l1_index(&self, addr: Addr) -> usize {
        ((addr >> BRANCH_SHIFT) as usize) & (self.l1.len() - 1)
    }

    /// The history register currently selected by `addr`.
    pub fn history(&self, addr: Addr) -> u32 {
        self.l1[self.l1_index(addr)]
    }

    pub fn l2_index(&self, addr: Addr) -> usize {
        let hist = self.history(addr) as u64;
        let baddr = addr >> BRANCH_SHIFT;
        let idx = if self.xor {
            ((hist ^ baddr) & self.history_mask()) | (baddr << self.shift_width)
        } else {
            hist | (baddr << self.shift_width)
        };
        (idx as usize) & (self.l2.size() - 1)
    }

    /// Predict the direction of the branch at `addr`, also returning the
    /// index of the level-2 counter used.
    pub fn lookup(&self, addr: Addr) -> (Outcome, usize) {
        let idx = self.l2_index(addr);
        (self.l2.get_entry(idx).predict(), idx)
    }

    /// Shift the outcome into the level-1 history for `addr`, then train the
    /// level-2 counter found by [`TwoLevel::lookup`].
    pub fn update(&mut self, idx: usize, addr: Addr, outcome: Outcome)
        -> Result<(), BpredError>
    {
        if idx >= self.l2.size() {
            return Err(BpredError::ProtocolMisuse("level-2 counter index out of range"));
        }
        let l1_idx = self.l1_index(addr);
        let mask = self.history_mask() as u32;
        let reg = &mut self.l1[l1_idx];
        *reg = ((*reg << 1) | bool::from(outcome) as u32) & mask;

        self.l2.get_entry_mut(idx).update(outcome);
        Ok(())
    }
}
