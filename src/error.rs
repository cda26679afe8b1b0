//! Error types.

use thiserror::Error;

use crate::config::PredictorClass;

/// Invalid or incompatible construction parameters.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{what} size `{size}` must be non-zero and a power of two")]
    NotPowerOfTwo { what: &'static str, size: usize },

    #[error("{what} size `{size}` must be zero or a power of two")]
    ZeroOrPowerOfTwo { what: &'static str, size: usize },

    #[error("log2 size `{bits}` of the {what} is out of range")]
    TableBits { what: &'static str, bits: u32 },

    #[error("shift register width `{0}` must be in 1..=30")]
    ShiftWidth(u32),

    #[error("perceptron history length `{0}` must be in 1..=64")]
    HistoryLength(usize),

    #[error("perceptron weight width `{0}` must be in 2..=16 bits")]
    WeightBits(u32),

    #[error("history window {start}..{end} does not fit in {capacity} entries")]
    HistoryWindow { start: usize, end: usize, capacity: usize },

    #[error("{what} uses `{len}` entries, more than the {max} held in history")]
    PathEntries { what: &'static str, len: usize, max: usize },

    #[error("{0:?} cannot be a component of a combined predictor")]
    CombinedComponent(PredictorClass),
}

/// Errors surfaced by a [`crate::BranchPredictor`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BpredError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// An update token does not belong to this predictor.
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(&'static str),
}

pub type Result<T> = std::result::Result<T, BpredError>;
