//! Run-level error taxonomy.

use hive_state::StorageError;

use crate::agents::AgentError;

/// Errors that end a run without a report.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("decomposition failed: {0}")]
    Decomposition(String),

    /// No task produced usable findings.
    #[error("run failed: {reason}")]
    RunFailed {
        reason: String,
        diagnostics: Vec<String>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failed_display_carries_reason_only() {
        let err = RunError::RunFailed {
            reason: "no task produced usable findings".into(),
            diagnostics: vec!["task-1: timeout".into()],
        };
        assert_eq!(err.to_string(), "run failed: no task produced usable findings");
    }
}
