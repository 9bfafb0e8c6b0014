//! Run outputs: the caller-facing report and the record handed to learning.

use chrono::{DateTime, Utc};
use hive_state::VersionId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::query::Query;
use super::synthesis::Coverage;
use super::task::TaskStatus;
use super::validation::ValidationSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub objective: String,
    pub status: TaskStatus,
    pub token_cost: u64,
    pub error: Option<String>,
}

/// Returned to the caller of `Orchestrator::submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub policy_version: VersionId,
    pub report: String,
    pub coverage: Coverage,
    pub confidence: f64,
    pub validation: ValidationSummary,
    /// Whether the caller's quality target (if any) was met.
    pub target_met: bool,
    pub tasks: Vec<TaskSummary>,
    pub citations: Vec<String>,
    pub token_cost: u64,
    pub execution_ms: u64,
    /// Non-fatal conditions such as a degraded plan.
    pub warnings: Vec<String>,
}

/// A finished run as seen by the learning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRun {
    pub run_id: Uuid,
    pub query: Query,
    pub report: String,
    pub validation_score: f64,
    pub passed: bool,
    pub policy_version: VersionId,
    pub token_cost: u64,
    pub execution_ms: u64,
    pub completed_at: DateTime<Utc>,
}
