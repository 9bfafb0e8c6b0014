use serde::{Deserialize, Serialize};

/// One reviewer's verdict on one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub dimension: String,
    /// 0–100.
    pub score: f64,
    pub notes: Vec<String>,
    /// False when the reviewer could not be reached and the score is a
    /// placeholder zero.
    pub available: bool,
}

/// Aggregated result of the validation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub verdicts: Vec<ValidationVerdict>,
    pub overall_score: f64,
    pub passed: bool,
    /// Dimensions scoring below the floor.
    pub failing_dimensions: Vec<String>,
    /// Deduplicated reviewer notes, failing dimensions first.
    pub notes: Vec<String>,
    pub revision_rounds: u32,
}

impl ValidationSummary {
    /// Ordering used to keep the better of two verdict sets.
    pub fn better_than(&self, other: &ValidationSummary) -> bool {
        (self.passed, self.overall_score) > (other.passed, other.overall_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(passed: bool, overall: f64) -> ValidationSummary {
        ValidationSummary {
            verdicts: Vec::new(),
            overall_score: overall,
            passed,
            failing_dimensions: Vec::new(),
            notes: Vec::new(),
            revision_rounds: 0,
        }
    }

    #[test]
    fn passing_beats_higher_failing_score() {
        assert!(summary(true, 71.0).better_than(&summary(false, 90.0)));
        assert!(summary(false, 60.0).better_than(&summary(false, 50.0)));
        assert!(!summary(false, 50.0).better_than(&summary(false, 50.0)));
    }
}
