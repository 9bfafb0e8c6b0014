use hive_state::StorageError;

use crate::agents::AgentError;

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("insufficient training data: {collected} validated runs, need {required}")]
    InsufficientTrainingData { collected: usize, required: usize },

    #[error("update diverges {divergence:.4} from the active policy, budget is {budget:.4}")]
    DivergenceBudgetExceeded { divergence: f64, budget: f64 },

    #[error("no learning signal in {examples} examples")]
    NoSignal { examples: usize },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("scoring failed: {0}")]
    Scoring(#[from] AgentError),
}

impl TrainingError {
    /// Skips are expected outcomes of a cycle, not faults.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            TrainingError::InsufficientTrainingData { .. }
                | TrainingError::DivergenceBudgetExceeded { .. }
                | TrainingError::NoSignal { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("invalid benchmark suite: {0}")]
    InvalidSuite(String),

    #[error("failed to read benchmark suite: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse benchmark suite: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
