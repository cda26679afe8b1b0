//! Types for representing branches and branch outcomes.

use crate::{Addr, Outcome};

/// Opcode classification supplied by the host instruction model.
///
/// The predictor never decodes instructions itself; it only asks these
/// questions about the opcode passed to [`crate::BranchPredictor::lookup`]
/// and [`crate::BranchPredictor::update`].
pub trait BranchOp: Copy + std::fmt::Debug {
    /// Returns 'true' for any control-flow instruction.
    fn is_control(&self) -> bool;

    /// Returns 'true' for a conditional branch.
    fn is_conditional(&self) -> bool;

    /// Returns 'true' if the target is read from a register.
    fn is_indirect(&self) -> bool;

    /// Returns 'true' for a procedure call.
    fn is_call(&self) -> bool;

    /// Returns 'true' for a procedure return.
    fn is_return(&self) -> bool;

    /// Returns 'true' for an unconditional control-flow instruction.
    fn is_unconditional(&self) -> bool {
        self.is_control() && !self.is_conditional()
    }
}

/// Representing different kinds of branch/control-flow instructions.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BranchKind {
    /// Not a control-flow instruction.
    Other        = 0,

    /// A direct conditional branch instruction.
    DirectBranch = BranchFlags::BRN_FLAG,

    /// A direct unconditional jump instruction.
    DirectJump   = BranchFlags::JMP_FLAG,

    /// An indirect unconditional jump instruction.
    IndirectJump = BranchFlags::JMP_FLAG | BranchFlags::IND_FLAG,

    /// A direct procedure call instruction.
    DirectCall   = BranchFlags::CALL_FLAG,

    /// An indirect procedure call instruction.
    IndirectCall = BranchFlags::CALL_FLAG | BranchFlags::IND_FLAG,

    /// A return instruction.
    Return       = BranchFlags::RET_FLAG | BranchFlags::IND_FLAG,
}
impl BranchKind {
    const DIRECT_BRANCH: u32 = BranchFlags::BRN_FLAG;
    const DIRECT_JUMP: u32 = BranchFlags::JMP_FLAG;
    const DIRECT_CALL: u32 = BranchFlags::CALL_FLAG;
    const INDIRECT_CALL: u32 = BranchFlags::CALL_FLAG | BranchFlags::IND_FLAG;
    const INDIRECT_JUMP: u32 = BranchFlags::JMP_FLAG | BranchFlags::IND_FLAG;
    const RETURN: u32 = BranchFlags::RET_FLAG | BranchFlags::IND_FLAG;

    /// Decode the kind bits of a set of [`BranchFlags`].
    pub fn from_bits(x: u32) -> Option<Self> {
        match x & BranchFlags::KIND_MASK {
            0                   => Some(Self::Other),
            Self::DIRECT_BRANCH => Some(Self::DirectBranch),
            Self::DIRECT_JUMP   => Some(Self::DirectJump),
            Self::DIRECT_CALL   => Some(Self::DirectCall),
            Self::INDIRECT_JUMP => Some(Self::IndirectJump),
            Self::INDIRECT_CALL => Some(Self::IndirectCall),
            Self::RETURN        => Some(Self::Return),
            _ => None,
        }
    }
}

impl BranchOp for BranchKind {
    fn is_control(&self) -> bool { !matches!(self, Self::Other) }
    fn is_conditional(&self) -> bool { matches!(self, Self::DirectBranch) }
    fn is_indirect(&self) -> bool { (*self as u32) & BranchFlags::IND_FLAG != 0 }
    fn is_call(&self) -> bool { (*self as u32) & BranchFlags::CALL_FLAG != 0 }
    fn is_return(&self) -> bool { matches!(self, Self::Return) }
}

/// Packed branch kind and outcome, as stored in a binary trace.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BranchFlags(pub u32);
impl BranchFlags {
    const BRN_FLAG: u32   = 1 << 0;
    const JMP_FLAG: u32   = 1 << 1;
    const CALL_FLAG: u32  = 1 << 2;
    const RET_FLAG: u32   = 1 << 3;
    const IND_FLAG: u32   = 1 << 4;
    const TAKEN_FLAG: u32 = 1 << 5;
    const KIND_MASK: u32  = 0b01_1111;

    pub fn new(kind: BranchKind, outcome: Outcome) -> Self {
        let taken = if bool::from(outcome) { Self::TAKEN_FLAG } else { 0 };
        Self(kind as u32 | taken)
    }

    pub fn is_taken(&self) -> bool { self.0 & Self::TAKEN_FLAG != 0 }

    /// Returns [None] when the kind bits do not name a [`BranchKind`].
    pub fn kind(&self) -> Option<BranchKind> {
        BranchKind::from_bits(self.0)
    }
}

/// A record of branch execution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BranchRecord {
    /// The program counter value for this branch
    pub pc: Addr,

    /// The target address evaluated for this branch
    pub tgt: Addr,

    /// The type/kind of branch
    pub kind: BranchKind,

    /// The outcome evaluated for this branch
    pub outcome: Outcome,
}
impl BranchRecord {
    pub fn new(pc: Addr, tgt: Addr, kind: BranchKind, outcome: Outcome) -> Self {
        Self { pc, tgt, kind, outcome }
    }

    /// Returns 'true' if this is a conditional instruction.
    pub fn is_conditional(&self) -> bool {
        self.kind.is_conditional()
    }

    /// Returns 'true' if this is a "call" or "return".
    pub fn is_procedural(&self) -> bool {
        self.kind.is_call() || self.kind.is_return()
    }

    /// The address fetched after this branch resolves.
    pub fn next_pc(&self) -> Addr {
        if bool::from(self.outcome) { self.tgt } else { self.pc.wrapping_add(crate::INST_BYTES) }
    }

    pub fn flags(&self) -> BranchFlags {
        BranchFlags::new(self.kind, self.outcome)
    }
}
