
use crate::Outcome;

/// A predictor with no state which always predicts the same direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticPredictor {
    direction: Outcome,
}
impl StaticPredictor {
    /// Always predict 'taken'.
    pub fn taken() -> Self { Self { direction: Outcome::T } }

    /// Always predict 'not-taken'.
    pub fn not_taken() -> Self { Self { direction: Outcome::N } }

    pub fn name(&self) -> &'static str {
        match self.direction {
            Outcome::T => "taken",
            Outcome::N => "nottaken",
        }
    }

    pub fn predict(&self) -> Outcome { self.direction }
}
