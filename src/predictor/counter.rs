
use crate::Outcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaturatingCounterConfig {
    /// Width of the counter [in bits]
    pub bits: u32,
}
impl Default for SaturatingCounterConfig {
    fn default() -> Self { Self { bits: 2 } }
}
impl SaturatingCounterConfig {
    pub fn storage_bits(&self) -> usize {
        self.bits as usize
    }

    /// The largest value held by a counter.
    pub fn max_value(&self) -> u8 {
        assert!((1..=8).contains(&self.bits));
        (((1u16) << self.bits) - 1) as u8
    }

    /// Build a counter starting at `value` (clamped to the counter range).
    pub fn build(self, value: u8) -> SaturatingCounter {
        let max = self.max_value();
        SaturatingCounter { ctr: value.min(max), max }
    }
}

/// An 'n'-bit saturating counter used to follow the behavior of a branch.
///
/// The counter predicts 'taken' in the upper half of its range. Taken
/// outcomes count up and not-taken outcomes count down, saturating at both
/// ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaturatingCounter {
    ctr: u8,
    max: u8,
}
impl SaturatingCounter {
    pub fn value(&self) -> u8 { self.ctr }
    pub fn max(&self) -> u8 { self.max }

    /// Smallest value which predicts 'taken'.
    fn threshold(&self) -> u8 {
        (self.max >> 1) + 1
    }

    pub fn increment(&mut self) {
        if self.ctr < self.max {
            self.ctr += 1;
        }
    }

    pub fn decrement(&mut self) {
        self.ctr = self.ctr.saturating_sub(1);
    }

    /// Return the current predicted direction.
    pub fn predict(&self) -> Outcome {
        Outcome::from(self.ctr >= self.threshold())
    }

    /// Update the state of the counter.
    pub fn update(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::T => self.increment(),
            Outcome::N => self.decrement(),
        }
    }

    pub fn set(&mut self, value: u8) {
        self.ctr = value.min(self.max);
    }
}
