//! Persisted record types: policy versions, benchmark runs, audit entries.
//!
//! Every record here is append-only. A `PolicyVersion` is never edited after
//! creation; training produces a new version whose `parent` points at the
//! version it was derived from, which keeps every rollback target intact.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Policy versions
// ---------------------------------------------------------------------------

/// Monotonic identifier of a policy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl VersionId {
    /// The id assigned to the first version in an empty lineage.
    pub const SEED: VersionId = VersionId(1);

    pub fn next(self) -> VersionId {
        VersionId(self.0 + 1)
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Generation-policy parameters carried by a version.
///
/// `adapter` references externally stored weights (an adapter or checkpoint
/// name understood by the inference backend). `weights` is the small set of
/// per-domain emphasis weights that self-distillation updates in-process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyParameters {
    pub adapter: Option<String>,
    pub weights: BTreeMap<String, f64>,
}

impl PolicyParameters {
    pub fn with_adapter(adapter: impl Into<String>) -> Self {
        Self {
            adapter: Some(adapter.into()),
            weights: BTreeMap::new(),
        }
    }

    /// Weight for `domain`, defaulting to 0.0 for domains never trained.
    pub fn weight(&self, domain: &str) -> f64 {
        self.weights.get(domain).copied().unwrap_or(0.0)
    }
}

/// How a version came into existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionOrigin {
    /// Installed by an operator (the initial policy, or a manual import).
    Seed,
    /// Produced by a self-distillation cycle.
    Distilled {
        examples: usize,
        mean_reward: f64,
        /// KL divergence from the parent on the regression domains.
        forgetting_score: f64,
    },
}

/// One immutable entry in the policy lineage table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub version_id: VersionId,
    pub parent: Option<VersionId>,
    pub parameters: PolicyParameters,
    pub origin: VersionOrigin,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Benchmark runs
// ---------------------------------------------------------------------------

/// Decision recorded alongside a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkDecision {
    Promote,
    Hold,
    Rollback,
}

impl std::fmt::Display for BenchmarkDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BenchmarkDecision::Promote => "promote",
            BenchmarkDecision::Hold => "hold",
            BenchmarkDecision::Rollback => "rollback",
        };
        write!(f, "{s}")
    }
}

/// Result of running the evaluation suite against one policy version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub run_id: Uuid,
    pub policy_version_id: VersionId,
    pub suite_id: String,
    /// Mean case score in 0.0–1.0.
    pub aggregate_score: f64,
    /// Per-case score in 0.0–1.0, keyed by case id.
    pub case_scores: BTreeMap<String, f64>,
    /// Per-case score minus the previously active version's score for the
    /// same case. Empty when there was no earlier run to compare with.
    pub case_deltas: BTreeMap<String, f64>,
    /// Whether `aggregate_score` met the suite's pass score.
    pub passed: bool,
    pub decision: BenchmarkDecision,
    /// Live-traffic EWMA (0.0–1.0) of the version at evaluation time, once
    /// enough samples had been seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Payload of an audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    VersionCreated {
        version: PolicyVersion,
    },
    VersionPromoted {
        from: VersionId,
        to: VersionId,
    },
    VersionRolledBack {
        from: VersionId,
        to: VersionId,
        reason: String,
    },
    BenchmarkRecorded {
        run: BenchmarkRun,
    },
    BenchmarkRegression {
        version: VersionId,
        baseline: f64,
        live_score: f64,
    },
    DegradationDetected {
        version: VersionId,
        baseline: f64,
        current: f64,
        degradation_pct: f64,
    },
    TrainingSkipped {
        reason: String,
        collected: usize,
        required: usize,
    },
    CandidateProduced {
        version: VersionId,
        parent: VersionId,
        examples: usize,
        forgetting_score: f64,
    },
    RunMetrics {
        run_id: Uuid,
        version: VersionId,
        validation_score: f64,
        token_usage: u64,
        execution_ms: u64,
        passed: bool,
    },
}

impl AuditEvent {
    /// Stable name used in log lines and `audit tail` output.
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::VersionCreated { .. } => "version_created",
            AuditEvent::VersionPromoted { .. } => "version_promoted",
            AuditEvent::VersionRolledBack { .. } => "version_rolled_back",
            AuditEvent::BenchmarkRecorded { .. } => "benchmark_recorded",
            AuditEvent::BenchmarkRegression { .. } => "benchmark_regression",
            AuditEvent::DegradationDetected { .. } => "degradation_detected",
            AuditEvent::TrainingSkipped { .. } => "training_skipped",
            AuditEvent::CandidateProduced { .. } => "candidate_produced",
            AuditEvent::RunMetrics { .. } => "run_metrics",
        }
    }
}

/// A timestamped audit entry. Never mutated after being appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}
