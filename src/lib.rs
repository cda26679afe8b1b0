//! Branch direction and target prediction for cycle-level simulators.
//!
//! The [`BranchPredictor`] facade is probed at fetch with [`BranchPredictor::lookup`],
//! trained at resolution with [`BranchPredictor::update`], and rewound after
//! a misprediction with [`BranchPredictor::recover`].

pub mod facade;
pub mod branch;
pub mod config;
pub mod error;
pub mod history;
pub mod predictor;
pub mod stats;
pub mod trace;

pub use facade::*;
pub use branch::*;
pub use config::*;
pub use error::*;
pub use history::*;
pub use predictor::*;

/// A host instruction address.
pub type Addr = u64;

/// Size of an instruction in bytes; the fall-through of a branch at `pc` is
/// `pc + INST_BYTES`.
pub const INST_BYTES: Addr = 4;

/// Number of low address bits ignored when hashing branch addresses.
pub const BRANCH_SHIFT: u32 = 2;

/// A branch outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Not taken
    N,
    /// Taken
    T,
}
impl Outcome {
    /// The sign used when this outcome is an input to a perceptron.
    pub fn sign(self) -> i32 {
        match self {
            Self::T => 1,
            Self::N => -1,
        }
    }
}
impl std::ops::Not for Outcome {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Self::N => Self::T,
            Self::T => Self::N,
        }
    }
}
impl From<bool> for Outcome {
    fn from(x: bool) -> Self {
        match x {
            true => Self::T,
            false => Self::N
        }
    }
}
impl From<Outcome> for bool {
    fn from(x: Outcome) -> bool {
        match x {
            Outcome::T => true,
            Outcome::N => false,
        }
    }
}
