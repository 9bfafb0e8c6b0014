//! Structured lifecycle events.
//!
//! Every function here emits a single `tracing` event carrying an
//! `event="..."` field so log pipelines can filter on it. Run-scoped
//! context comes from [`RunSpan`].

use hive_state::{BenchmarkDecision, VersionId};
use tracing::{info, warn};

use crate::domain::{Coverage, TaskStatus};

/// RAII guard that keeps a run-scoped span entered.
///
/// Only use this in synchronous sections; across `.await` points wrap the
/// future with [`run_span`] and `tracing::Instrument` instead.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The span every run executes under.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("hive.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, domain: &str, policy: VersionId) {
    info!(event = "run.started", run_id = %run_id, domain = %domain, policy = %policy);
}

pub fn emit_plan_degraded(run_id: &str, reason: &str) {
    warn!(event = "plan.degraded", run_id = %run_id, reason = %reason);
}

pub fn emit_task_finished(task_id: &str, status: TaskStatus, tokens: u64, steps: u32) {
    info!(
        event = "task.finished",
        task_id = %task_id,
        status = %status,
        tokens = tokens,
        steps = steps,
    );
}

pub fn emit_validation_completed(overall: f64, passed: bool, revisions: u32) {
    info!(
        event = "validation.completed",
        overall = overall,
        passed = passed,
        revisions = revisions,
    );
}

pub fn emit_run_finished(
    run_id: &str,
    duration_ms: u64,
    coverage: Coverage,
    tokens: u64,
    passed: bool,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        coverage = %coverage,
        tokens = tokens,
        passed = passed,
    );
}

pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

pub fn emit_training_cycle(candidate: VersionId, examples: usize, forgetting: f64) {
    info!(
        event = "training.cycle",
        candidate = %candidate,
        examples = examples,
        forgetting = forgetting,
    );
}

pub fn emit_training_skipped(reason: &dyn std::fmt::Display) {
    info!(event = "training.skipped", reason = %reason);
}

pub fn emit_governor_decision(active: VersionId, decision: BenchmarkDecision, score: f64) {
    info!(
        event = "governor.decision",
        active = %active,
        decision = %decision,
        score = score,
    );
}

pub fn emit_policy_promoted(from: VersionId, to: VersionId) {
    info!(event = "policy.promoted", from = %from, to = %to);
}

pub fn emit_policy_rolled_back(from: VersionId, to: VersionId, reason: &str) {
    warn!(event = "policy.rolled_back", from = %from, to = %to, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_enters_without_subscriber() {
        let _span = RunSpan::enter("run-1");
        emit_run_started("run-1", "finance", VersionId::SEED);
    }
}
