//! Regeneration decision rule.
//!
//! Evaluated once per completed evaluation. The order of the checks matters:
//! a passing verdict wins even on the last allowed iteration, and exhaustion
//! is checked before another loop is granted.

use super::model::{EvaluationVerdict, Status};

/// Outcome of the decision rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The verdict meets the threshold; finalize the current attempt.
    Accept,
    /// Below threshold with iterations left; generate again.
    Retry,
    /// Below threshold and out of iterations; finalize anyway.
    Exhausted,
}

impl Decision {
    /// Status the controller moves to after this decision.
    pub fn next_status(self) -> Status {
        match self {
            Self::Accept | Self::Exhausted => Status::Finalizing,
            Self::Retry => Status::Generating,
        }
    }
}

/// Apply the decision rule.
///
/// `meets_threshold` is taken from the verdict as asserted by the evaluator
/// and is never recomputed from the score here.
pub fn decide(verdict: &EvaluationVerdict, iteration_count: u32, max_iterations: u32) -> Decision {
    if verdict.meets_threshold {
        Decision::Accept
    } else if iteration_count >= max_iterations {
        Decision::Exhausted
    } else {
        Decision::Retry
    }
}
