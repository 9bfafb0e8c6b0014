//! Benchmark gate for policy versions.
//!
//! An evaluation scores the active version (and a pending candidate, if
//! any) on the fixed suite. A candidate is promoted only when it passes the
//! suite and beats the active version by `promote_margin` (relative).
//!
//! Live quality is the EWMA of validation scores under the active version.
//! The first evaluation that sees `min_live_samples` of them stores the
//! EWMA on the version's benchmark run; that value is the version's live
//! baseline. Later evaluations compare the live EWMA against it, and a drop
//! larger than `degradation_threshold` rolls back to the nearest ancestor
//! with a passing benchmark run. Without such an ancestor the regression is
//! recorded and the active version is held.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use hive_state::{
    AuditEvent, AuditLog, AuditRecord, BenchmarkDecision, BenchmarkLog, BenchmarkRun,
    VersionId,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::benchmark::{BenchmarkSuite, SuiteRunner, SuiteScore};
use super::error::GovernorError;
use crate::config::GovernorConfig;
use crate::domain::CompletedRun;
use crate::metrics::METRICS;
use crate::obs;
use crate::policy::PolicyStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorState {
    Idle,
    Evaluating,
    Decided(BenchmarkDecision),
}

/// Live quality of the active version, 0.0–1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LiveScore {
    version: VersionId,
    ewma: Option<f64>,
    samples: usize,
}

impl LiveScore {
    fn new(version: VersionId) -> Self {
        Self {
            version,
            ewma: None,
            samples: 0,
        }
    }

    fn record(&mut self, alpha: f64, value: f64) {
        self.ewma = Some(match self.ewma {
            Some(prev) => alpha * value + (1.0 - alpha) * prev,
            None => value,
        });
        self.samples += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GovernorOutcome {
    pub decision: BenchmarkDecision,
    pub active_run: BenchmarkRun,
    pub candidate_run: Option<BenchmarkRun>,
    /// Active version once the decision has been applied.
    pub active_after: VersionId,
}

/// Relative improvement of `candidate` over `active`; absolute when the
/// active score is zero.
pub fn improvement(candidate: f64, active: f64) -> f64 {
    if active > 0.0 {
        (candidate - active) / active
    } else {
        candidate - active
    }
}

fn deltas(
    scores: &BTreeMap<String, f64>,
    against: Option<&BTreeMap<String, f64>>,
) -> BTreeMap<String, f64> {
    let Some(base) = against else {
        return BTreeMap::new();
    };
    scores
        .iter()
        .filter_map(|(case, s)| base.get(case).map(|b| (case.clone(), s - b)))
        .collect()
}

pub struct BenchmarkGovernor {
    config: GovernorConfig,
    suite: BenchmarkSuite,
    runner: SuiteRunner,
    store: Arc<PolicyStore>,
    benchmarks: Arc<dyn BenchmarkLog>,
    audit: Arc<dyn AuditLog>,
    state: GovernorState,
    runs_since_eval: usize,
    live: LiveScore,
    pending: Option<VersionId>,
}

impl BenchmarkGovernor {
    pub fn new(
        config: &GovernorConfig,
        suite: BenchmarkSuite,
        runner: SuiteRunner,
        store: Arc<PolicyStore>,
        benchmarks: Arc<dyn BenchmarkLog>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let live = LiveScore::new(store.active_id());
        Self {
            config: config.clone(),
            suite,
            runner,
            store,
            benchmarks,
            audit,
            state: GovernorState::Idle,
            runs_since_eval: 0,
            live,
            pending: None,
        }
    }

    pub fn state(&self) -> GovernorState {
        self.state
    }

    pub fn suite(&self) -> &BenchmarkSuite {
        &self.suite
    }

    /// Current live EWMA and its sample count.
    pub fn live_score(&self) -> (Option<f64>, usize) {
        (self.live.ewma, self.live.samples)
    }

    pub fn pending_candidate(&self) -> Option<VersionId> {
        self.pending
    }

    /// Fold a completed run into the live score. Returns `true` when a
    /// scheduled evaluation is due.
    pub fn observe(&mut self, run: &CompletedRun) -> bool {
        let active = self.store.active_id();
        if self.live.version != active {
            self.live = LiveScore::new(active);
        }
        if run.policy_version == active {
            let value = (run.validation_score / 100.0).clamp(0.0, 1.0);
            self.live.record(self.config.ewma_alpha, value);
        }
        self.runs_since_eval += 1;
        self.runs_since_eval >= self.config.every_runs
    }

    /// Queue a candidate for the next evaluation (which the caller should
    /// trigger right away).
    pub fn submit_candidate(&mut self, id: VersionId) {
        self.pending = Some(id);
    }

    fn benchmark_run(
        &self,
        version: VersionId,
        score: &SuiteScore,
        against: Option<&BTreeMap<String, f64>>,
        decision: BenchmarkDecision,
    ) -> BenchmarkRun {
        BenchmarkRun {
            run_id: Uuid::new_v4(),
            policy_version_id: version,
            suite_id: self.suite.suite_id.clone(),
            aggregate_score: score.aggregate,
            case_deltas: deltas(&score.case_scores, against),
            case_scores: score.case_scores.clone(),
            passed: score.aggregate >= self.suite.pass_score,
            decision,
            live_score: None,
            created_at: Utc::now(),
        }
    }

    /// Live EWMA of `version`, once it rests on enough samples.
    fn settled_live(&self, version: VersionId) -> Option<f64> {
        if self.live.version == version && self.live.samples >= self.config.min_live_samples {
            self.live.ewma
        } else {
            None
        }
    }

    /// Live EWMA stored by the earliest settled evaluation of `version`.
    async fn live_baseline(&self, version: VersionId) -> Result<Option<f64>, GovernorError> {
        Ok(self
            .benchmarks
            .for_version(version)
            .await?
            .iter()
            .find_map(|r| r.live_score))
    }

    async fn record(&self, run: &BenchmarkRun) -> Result<(), GovernorError> {
        self.benchmarks.append(run.clone()).await?;
        self.audit
            .append(AuditRecord::now(AuditEvent::BenchmarkRecorded { run: run.clone() }))
            .await?;
        Ok(())
    }

    /// Nearest ancestor of `active` with a passing benchmark run.
    async fn rollback_target(
        &self,
        active: VersionId,
    ) -> Result<Option<VersionId>, GovernorError> {
        let ancestry = self.store.lineage().ancestry(active).await?;
        for id in ancestry.into_iter().skip(1) {
            if self.benchmarks.has_passing_run(id).await? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self), fields(active = %self.store.active_id()))]
    pub async fn evaluate(&mut self) -> Result<GovernorOutcome, GovernorError> {
        self.state = GovernorState::Evaluating;
        self.runs_since_eval = 0;
        let outcome = self.decide().await;
        self.state = match &outcome {
            Ok(o) => GovernorState::Decided(o.decision),
            Err(_) => GovernorState::Idle,
        };
        outcome
    }

    async fn decide(&mut self) -> Result<GovernorOutcome, GovernorError> {
        let active = self.store.snapshot();
        let previous = self.benchmarks.latest_for_version(active.version_id).await?;
        let active_score = self.runner.score(&self.suite, &active).await;
        let live_baseline = self.live_baseline(active.version_id).await?;
        let live_now = self.settled_live(active.version_id);

        let mut decision = BenchmarkDecision::Hold;
        let mut candidate_run = None;

        if let Some(candidate_id) = self.pending.take().filter(|c| *c != active.version_id) {
            let candidate = self.store.get(candidate_id).await?;
            let score = self.runner.score(&self.suite, &candidate).await;
            let gain = improvement(score.aggregate, active_score.aggregate);
            let passes = score.aggregate >= self.suite.pass_score;
            let promote = passes && gain >= self.config.promote_margin;
            info!(
                candidate = %candidate_id,
                candidate_score = score.aggregate,
                active_score = active_score.aggregate,
                gain,
                promote,
                "candidate evaluated"
            );
            let run = self.benchmark_run(
                candidate_id,
                &score,
                Some(&active_score.case_scores),
                if promote {
                    BenchmarkDecision::Promote
                } else {
                    BenchmarkDecision::Hold
                },
            );
            self.record(&run).await?;
            candidate_run = Some(run);

            if promote {
                self.store.promote(candidate_id).await?;
                METRICS.inc_promotions();
                decision = BenchmarkDecision::Promote;
            }
        }

        if decision == BenchmarkDecision::Hold {
            if let (Some(baseline), Some(current)) = (live_baseline, live_now) {
                decision = self
                    .check_degradation(active.version_id, baseline, current)
                    .await?;
            }
        }

        let mut active_run = self.benchmark_run(
            active.version_id,
            &active_score,
            previous.as_ref().map(|r| &r.case_scores),
            decision,
        );
        active_run.live_score = live_now;
        self.record(&active_run).await?;

        let active_after = self.store.active_id();
        if active_after != self.live.version {
            self.live = LiveScore::new(active_after);
        }
        obs::emit_governor_decision(active_after, decision, active_score.aggregate);
        Ok(GovernorOutcome {
            decision,
            active_run,
            candidate_run,
            active_after,
        })
    }

    async fn check_degradation(
        &self,
        active: VersionId,
        baseline: f64,
        current: f64,
    ) -> Result<BenchmarkDecision, GovernorError> {
        if current >= baseline - self.config.degradation_threshold {
            return Ok(BenchmarkDecision::Hold);
        }

        let degradation_pct = if baseline > 0.0 {
            (baseline - current) / baseline * 100.0
        } else {
            0.0
        };
        warn!(%active, baseline, current, degradation_pct, "live quality degraded");
        self.audit
            .append(AuditRecord::now(AuditEvent::DegradationDetected {
                version: active,
                baseline,
                current,
                degradation_pct,
            }))
            .await?;

        match self.rollback_target(active).await? {
            Some(target) => {
                let reason = format!(
                    "live score {current:.3} fell {degradation_pct:.1}% below baseline {baseline:.3}"
                );
                self.store.rollback(target, &reason).await?;
                METRICS.inc_rollbacks();
                Ok(BenchmarkDecision::Rollback)
            }
            None => {
                warn!(%active, "no ancestor with a passing benchmark run, holding");
                self.audit
                    .append(AuditRecord::now(AuditEvent::BenchmarkRegression {
                        version: active,
                        baseline,
                        live_score: current,
                    }))
                    .await?;
                Ok(BenchmarkDecision::Hold)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improvement_is_relative() {
        assert!((improvement(0.51, 0.50) - 0.02).abs() < 1e-9);
        assert!((improvement(0.3, 0.0) - 0.3).abs() < 1e-9);
        assert!(improvement(0.4, 0.5) < 0.0);
    }

    #[test]
    fn ewma_weights_recent_samples() {
        let mut live = LiveScore::new(VersionId::SEED);
        live.record(0.5, 1.0);
        assert_eq!(live.ewma, Some(1.0));
        live.record(0.5, 0.0);
        assert_eq!(live.ewma, Some(0.5));
        assert_eq!(live.samples, 2);
    }

    #[test]
    fn deltas_only_cover_shared_cases() {
        let now: BTreeMap<String, f64> = [("a".into(), 0.8), ("b".into(), 0.4)].into();
        let before: BTreeMap<String, f64> = [("a".into(), 0.5)].into();
        let d = deltas(&now, Some(&before));
        assert_eq!(d.len(), 1);
        assert!((d["a"] - 0.3).abs() < 1e-9);
        assert!(deltas(&now, None).is_empty());
    }
}
