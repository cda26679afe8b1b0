//! Folded (compressed) views of global history.

use serde::Serialize;

/// A circular shift register used to track folded history.
///
/// This folds the newest `len` bits of global history into `width` bits, but
/// without the need to actually read all of the history bits and fold them
/// all together with XOR. Bit `d` of history (`d = 0` being the newest)
/// contributes to output bit `d % width`.
///
/// Each update only needs the bit entering the window and the bit leaving
/// it, so advancing history costs the same regardless of `len`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FoldedHistory {
    /// The folded value.
    comp: usize,

    /// The number of history bits being folded.
    len: usize,

    /// The size of the output [in bits].
    width: usize,

    /// The output bit where the bit leaving the window was folded.
    outpoint: usize,
}
impl FoldedHistory {
    pub fn new(len: usize, width: usize) -> Self {
        assert!(width > 0 && width < usize::BITS as usize);
        Self { comp: 0, len, width, outpoint: len % width }
    }

    pub fn len(&self) -> usize { self.len }
    pub fn width(&self) -> usize { self.width }

    /// Return the folded history as a [usize].
    pub fn value(&self) -> usize { self.comp }

    /// Shift in `entering` and fold out `leaving`, the bit that was `len - 1`
    /// deep before this update.
    pub fn update(&mut self, entering: bool, leaving: bool) {
        let mask = (1 << self.width) - 1;

        // Rotate by one bit, the newest history bit lands in bit 0
        let mut comp = (self.comp << 1) | entering as usize;

        // The leaving bit has rotated along with everything else
        comp ^= (leaving as usize) << self.outpoint;

        // Wrap the carried-out top bit around
        comp ^= comp >> self.width;
        self.comp = comp & mask;
    }

    pub fn reset(&mut self) {
        self.comp = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn folds_single_bit() {
        let mut f = FoldedHistory::new(8, 3);
        f.update(true, false);
        assert_eq!(f.value(), 0b001);
        for _ in 0..4 {
            f.update(false, false);
        }
        // The bit is now 4 deep, which folds into output bit 1
        assert_eq!(f.value(), 0b010);
    }

    #[test]
    fn bit_leaves_window() {
        let mut f = FoldedHistory::new(4, 3);
        f.update(true, false);
        f.update(false, false);
        f.update(false, false);
        f.update(false, false);
        assert_eq!(f.value(), 0b001);
        // The set bit was 3 deep, and leaves now
        f.update(false, true);
        assert_eq!(f.value(), 0);
    }
}
