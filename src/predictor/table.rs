//! Direct-mapped tables of saturating counters.

use crate::predictor::*;
use crate::{Addr, BRANCH_SHIFT};

/// Hash a branch address into a table of `size` entries, folding in the
/// high-order address bits.
pub fn bimodal_index(addr: Addr, size: usize) -> usize {
    debug_assert!(size.is_power_of_two());
    (((addr >> 19) ^ (addr >> BRANCH_SHIFT)) as usize) & (size - 1)
}

/// A table of saturating counters.
///
/// Entries start out alternating between weakly not-taken and weakly taken.
#[derive(Clone, Debug)]
pub struct CounterTable {
    cfg: SaturatingCounterConfig,
    data: Vec<SaturatingCounter>,
}
impl CounterTable {
    pub fn new(size: usize, cfg: SaturatingCounterConfig) -> Self {
        assert!(size.is_power_of_two());
        let weak_n = cfg.max_value() >> 1;
        let data = (0..size)
            .map(|i| cfg.build(if i % 2 == 0 { weak_n } else { weak_n + 1 }))
            .collect();
        Self { cfg, data }
    }

    pub fn storage_bits(&self) -> usize {
        self.cfg.storage_bits() * self.data.len()
    }

    /// Returns [None] when `idx` is out of range.
    pub fn get(&self, idx: usize) -> Option<&SaturatingCounter> {
        self.data.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut SaturatingCounter> {
        self.data.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SaturatingCounter> {
        self.data.iter()
    }
}
impl PredictorTable for CounterTable {
    type Input = usize;
    type Entry = SaturatingCounter;

    fn size(&self) -> usize { self.data.len() }

    fn get_index(&self, input: usize) -> usize {
        input & self.index_mask()
    }

    fn get_entry(&self, input: usize) -> &SaturatingCounter {
        let idx = self.get_index(input);
        &self.data[idx]
    }

    fn get_entry_mut(&mut self, input: usize) -> &mut SaturatingCounter {
        let idx = self.get_index(input);
        &mut self.data[idx]
    }
}
