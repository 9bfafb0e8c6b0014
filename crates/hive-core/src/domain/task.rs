//! Fan-out task vocabulary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One independently executable sub-objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub objective: String,
    pub success_criteria: String,
    /// Explicit inputs the executor may use; nothing else from the run is visible.
    pub inputs: BTreeMap<String, String>,
    pub max_steps: u32,
    pub max_tokens_budget: u64,
}

impl TaskSpec {
    pub fn input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    Partial,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Partial => "partial",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Bounded distillate of a task's work. The executor's intermediate
/// reasoning never reaches this struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Findings {
    pub summary: String,
    pub key_points: Vec<String>,
}

impl Findings {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.key_points.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub findings: Findings,
    pub citations: Vec<String>,
    pub token_cost: u64,
    pub steps: u32,
    /// Why the task ended `partial` or `failed`.
    pub error: Option<String>,
}

impl TaskResult {
    pub fn failed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            findings: Findings::default(),
            citations: Vec::new(),
            token_cost: 0,
            steps: 0,
            error: Some(reason.into()),
        }
    }

    /// Usable results contribute to synthesis.
    pub fn is_usable(&self) -> bool {
        self.status != TaskStatus::Failed && !self.findings.is_empty()
    }
}
