
use crate::{Addr, INST_BYTES};

/// A circular return-address stack.
///
/// Calls push their fall-through address and returns pop a predicted target.
/// Overflow wraps around and overwrites the oldest entry. The top-of-stack
/// pointer can be restored after a misprediction with
/// [`ReturnStack::recover`], though the contents are never repaired.
#[derive(Clone, Debug)]
pub struct ReturnStack {
    data: Vec<Option<Addr>>,
    tos: usize,
}
impl ReturnStack {
    pub fn new(size: usize) -> Self {
        assert!(size == 0 || size.is_power_of_two());
        Self {
            data: vec![None; size],
            tos: size.saturating_sub(1),
        }
    }

    pub fn size(&self) -> usize { self.data.len() }
    pub fn is_enabled(&self) -> bool { !self.data.is_empty() }
    pub fn tos(&self) -> usize { self.tos }

    /// Push the return address for a call at `addr`.
    pub fn push(&mut self, addr: Addr) {
        if self.data.is_empty() {
            return;
        }
        self.tos = (self.tos + 1) % self.data.len();
        self.data[self.tos] = Some(addr.wrapping_add(INST_BYTES));
    }

    /// Pop the predicted return target. [None] if the entry on top of the
    /// stack was never written.
    pub fn pop(&mut self) -> Option<Addr> {
        if self.data.is_empty() {
            return None;
        }
        let target = self.data[self.tos];
        self.tos = (self.tos + self.data.len() - 1) % self.data.len();
        target
    }

    /// Probe the stack for the instruction at `addr`.
    ///
    /// Returns the top-of-stack pointer as it was before this instruction
    /// touched the stack, and the predicted target for a return.
    pub fn lookup(&mut self, is_call: bool, is_return: bool, addr: Addr)
        -> (usize, Option<Addr>)
    {
        let snapshot = self.tos;
        let mut target = None;
        if is_return {
            target = self.pop();
        } else if is_call {
            self.push(addr);
        }
        (snapshot, target)
    }

    /// Restore the top-of-stack pointer.
    pub fn recover(&mut self, snapshot: usize) {
        if !self.data.is_empty() {
            self.tos = snapshot % self.data.len();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn call_then_return() {
        let mut ras = ReturnStack::new(8);
        assert_eq!(ras.tos(), 7);
        let (snap, _) = ras.lookup(true, false, 0x1000);
        assert_eq!(snap, 7);
        assert_eq!(ras.tos(), 0);
        assert_eq!(ras.lookup(false, true, 0x2000), (0, Some(0x1004)));
        assert_eq!(ras.tos(), 7);
    }

    #[test]
    fn recover_restores_tos() {
        let mut ras = ReturnStack::new(4);
        ras.push(0x100);
        ras.push(0x200);
        let (snap, t) = ras.lookup(false, true, 0x300);
        assert_eq!(t, Some(0x204));
        ras.push(0x400);
        ras.recover(snap);
        assert_eq!(ras.tos(), snap);
        // The push after the return clobbered the entry
        assert_eq!(ras.pop(), Some(0x404));
    }

    #[test]
    fn overflow_wraps() {
        let mut ras = ReturnStack::new(2);
        ras.push(0x10);
        ras.push(0x20);
        ras.push(0x30);
        assert_eq!(ras.pop(), Some(0x34));
        assert_eq!(ras.pop(), Some(0x24));
        assert_eq!(ras.pop(), Some(0x34));
    }

    #[test]
    fn empty_stack() {
        let mut ras = ReturnStack::new(4);
        assert_eq!(ras.pop(), None);
        let mut ras = ReturnStack::new(0);
        ras.push(0x10);
        assert_eq!(ras.lookup(false, true, 0x20), (0, None));
    }
}
