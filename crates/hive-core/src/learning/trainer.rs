//! Self-distillation fine-tuning.
//!
//! Validated runs are the teacher signal. For each one the active policy
//! answers the same query again (the student); both answers are scored by
//! the validation tree and the difference becomes a per-domain reward.
//! The update moves the per-domain weights along the mean reward, halving
//! the step until the KL divergence from the active version on the
//! regression domains fits the budget. The result is a new, inactive
//! version in the lineage; promotion is the governor's call.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use hive_state::{
    AuditEvent, AuditLog, AuditRecord, PolicyParameters, PolicyVersion, VersionOrigin,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::TrainingError;
use crate::config::TrainerConfig;
use crate::domain::{CompletedRun, SynthesizedContext};
use crate::gateway::{GenerationConstraints, ModelGateway, Purpose};
use crate::metrics::METRICS;
use crate::obs;
use crate::policy::PolicyStore;
use crate::retry::RetryPolicy;
use crate::validation::ValidationTree;

const STUDENT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Collecting,
    Distilling,
    Updating,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub source_run: Uuid,
    pub domain: String,
    pub prompt: String,
    pub teacher_output: String,
    pub student_output: String,
    pub teacher_score: f64,
    pub student_score: f64,
    /// (teacher - student) / 100.
    pub reward: f64,
}

/// Accepted parameter update.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub parameters: PolicyParameters,
    pub divergence: f64,
    pub mean_reward: f64,
    /// Fraction of the full learning-rate step that was applied.
    pub step_scale: f64,
}

fn softmax(weights: &BTreeMap<String, f64>, domains: &BTreeSet<String>) -> Vec<f64> {
    let values: Vec<f64> = domains
        .iter()
        .map(|d| weights.get(d).copied().unwrap_or(0.0))
        .collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// KL(active || candidate) over `domains`.
pub fn divergence(
    active: &BTreeMap<String, f64>,
    candidate: &BTreeMap<String, f64>,
    domains: &BTreeSet<String>,
) -> f64 {
    if domains.is_empty() {
        return 0.0;
    }
    let p = softmax(active, domains);
    let q = softmax(candidate, domains);
    p.iter()
        .zip(q.iter())
        .filter(|(pi, _)| **pi > 0.0)
        .map(|(pi, qi)| pi * (pi / qi).ln())
        .sum()
}

/// Compute the divergence-constrained update from `examples`.
pub fn propose_update(
    active: &PolicyParameters,
    examples: &[TrainingExample],
    config: &TrainerConfig,
    regression_domains: &[String],
) -> Result<Update, TrainingError> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for ex in examples {
        let entry = sums.entry(ex.domain.clone()).or_insert((0.0, 0));
        entry.0 += ex.reward;
        entry.1 += 1;
    }
    let gradient: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(d, (sum, n))| (d, sum / n as f64))
        .collect();
    if gradient.values().all(|g| g.abs() < f64::EPSILON) {
        return Err(TrainingError::NoSignal {
            examples: examples.len(),
        });
    }
    let mean_reward = examples.iter().map(|e| e.reward).sum::<f64>() / examples.len() as f64;

    let domains: BTreeSet<String> = regression_domains
        .iter()
        .cloned()
        .chain(gradient.keys().cloned())
        .chain(active.weights.keys().cloned())
        .collect();

    let mut scale = 1.0;
    let mut last = 0.0;
    for attempt in 0..=config.max_backtracks {
        let mut weights = active.weights.clone();
        for (domain, g) in &gradient {
            *weights.entry(domain.clone()).or_insert(0.0) += scale * config.learning_rate * g;
        }
        let kl = divergence(&active.weights, &weights, &domains);
        if kl <= config.max_divergence {
            debug!(attempt, scale, kl, "update accepted");
            return Ok(Update {
                parameters: PolicyParameters {
                    adapter: active.adapter.clone(),
                    weights,
                },
                divergence: kl,
                mean_reward,
                step_scale: scale,
            });
        }
        last = kl;
        scale *= 0.5;
    }
    Err(TrainingError::DivergenceBudgetExceeded {
        divergence: last,
        budget: config.max_divergence,
    })
}

pub struct SelfDistillationTrainer {
    config: TrainerConfig,
    regression_domains: Vec<String>,
    gateway: Arc<dyn ModelGateway>,
    retry: RetryPolicy,
    scorer: Arc<ValidationTree>,
    store: Arc<PolicyStore>,
    audit: Arc<dyn AuditLog>,
    recent: VecDeque<CompletedRun>,
    /// Runs in `recent` that already produced a buffered example.
    distilled: HashSet<Uuid>,
    buffer: VecDeque<TrainingExample>,
    runs_since_cycle: usize,
    state: TrainerState,
}

impl SelfDistillationTrainer {
    /// `fallback_domains` is used when the config lists no regression domains.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &TrainerConfig,
        fallback_domains: Vec<String>,
        gateway: Arc<dyn ModelGateway>,
        retry: RetryPolicy,
        scorer: Arc<ValidationTree>,
        store: Arc<PolicyStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let regression_domains = if config.regression_domains.is_empty() {
            fallback_domains
        } else {
            config.regression_domains.clone()
        };
        Self {
            config: config.clone(),
            regression_domains,
            gateway,
            retry,
            scorer,
            store,
            audit,
            recent: VecDeque::with_capacity(config.window),
            distilled: HashSet::new(),
            buffer: VecDeque::with_capacity(config.buffer_capacity),
            runs_since_cycle: 0,
            state: TrainerState::Idle,
        }
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered examples, oldest first.
    pub fn examples(&self) -> impl Iterator<Item = &TrainingExample> {
        self.buffer.iter()
    }

    /// Record a completed run. Returns `true` when a cycle is due.
    pub fn observe(&mut self, run: CompletedRun) -> bool {
        if self.recent.len() == self.config.window {
            if let Some(evicted) = self.recent.pop_front() {
                self.distilled.remove(&evicted.run_id);
            }
        }
        self.recent.push_back(run);
        self.runs_since_cycle += 1;
        self.runs_since_cycle >= self.config.every_runs
    }

    /// Run one collect, distill, update cycle. Skips are audited and
    /// returned as errors for which [`TrainingError::is_skip`] holds.
    pub async fn run_cycle(&mut self) -> Result<PolicyVersion, TrainingError> {
        self.runs_since_cycle = 0;
        let outcome = self.cycle().await;
        self.state = TrainerState::Idle;
        match &outcome {
            Ok(candidate) => {
                METRICS.inc_candidates();
                if let VersionOrigin::Distilled {
                    examples,
                    forgetting_score,
                    ..
                } = &candidate.origin
                {
                    obs::emit_training_cycle(candidate.version_id, *examples, *forgetting_score);
                }
            }
            Err(e) if e.is_skip() => {
                obs::emit_training_skipped(e);
                let (collected, required) = match e {
                    TrainingError::InsufficientTrainingData {
                        collected,
                        required,
                    } => (*collected, *required),
                    _ => (self.buffer.len(), self.config.min_examples),
                };
                self.audit
                    .append(AuditRecord::now(AuditEvent::TrainingSkipped {
                        reason: e.to_string(),
                        collected,
                        required,
                    }))
                    .await?;
            }
            Err(e) => warn!(error = %e, "training cycle failed"),
        }
        outcome
    }

    async fn cycle(&mut self) -> Result<PolicyVersion, TrainingError> {
        self.state = TrainerState::Collecting;
        let demos: Vec<CompletedRun> =
            self.recent.iter().filter(|r| r.passed).cloned().collect();
        if demos.len() < self.config.min_examples {
            return Err(TrainingError::InsufficientTrainingData {
                collected: demos.len(),
                required: self.config.min_examples,
            });
        }

        self.state = TrainerState::Distilling;
        let active = self.store.snapshot();
        let pending: Vec<&CompletedRun> = demos
            .iter()
            .filter(|d| !self.distilled.contains(&d.run_id))
            .collect();
        let mut fresh = 0;
        for demo in pending {
            if let Some(example) = self.distill(demo, &active).await? {
                self.buffer.retain(|e| e.source_run != example.source_run);
                if self.buffer.len() == self.config.buffer_capacity {
                    self.buffer.pop_front();
                }
                self.buffer.push_back(example);
                self.distilled.insert(demo.run_id);
                fresh += 1;
            }
        }
        if fresh == 0 {
            return Err(TrainingError::InsufficientTrainingData {
                collected: 0,
                required: self.config.min_examples,
            });
        }

        self.state = TrainerState::Updating;
        let examples: Vec<TrainingExample> = self.buffer.iter().cloned().collect();
        let update = propose_update(
            &active.parameters,
            &examples,
            &self.config,
            &self.regression_domains,
        )?;
        let candidate = self
            .store
            .create_candidate(
                active.version_id,
                update.parameters,
                VersionOrigin::Distilled {
                    examples: examples.len(),
                    mean_reward: update.mean_reward,
                    forgetting_score: update.divergence,
                },
            )
            .await?;
        self.audit
            .append(AuditRecord::now(AuditEvent::CandidateProduced {
                version: candidate.version_id,
                parent: active.version_id,
                examples: examples.len(),
                forgetting_score: update.divergence,
            }))
            .await?;
        info!(
            candidate = %candidate.version_id,
            parent = %active.version_id,
            step_scale = update.step_scale,
            "distilled candidate"
        );
        Ok(candidate)
    }

    async fn distill(
        &self,
        demo: &CompletedRun,
        active: &PolicyVersion,
    ) -> Result<Option<TrainingExample>, TrainingError> {
        let constraints = GenerationConstraints::new(Purpose::Distill, STUDENT_MAX_TOKENS);
        let student = match self
            .retry
            .run("distill", || {
                self.gateway
                    .generate(active.version_id, &demo.query.text, &constraints)
            })
            .await
        {
            Ok(g) => g.text,
            Err(e) => {
                warn!(run_id = %demo.run_id, error = %e, "student generation failed, skipping");
                return Ok(None);
            }
        };
        let scored = self
            .scorer
            .evaluate(&SynthesizedContext::from_text(student.clone()), active.version_id)
            .await?;
        Ok(Some(TrainingExample {
            source_run: demo.run_id,
            domain: demo.query.domain.clone(),
            prompt: demo.query.text.clone(),
            teacher_output: demo.report.clone(),
            student_output: student,
            teacher_score: demo.validation_score,
            student_score: scored.overall_score,
            reward: (demo.validation_score - scored.overall_score) / 100.0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(domain: &str, reward: f64) -> TrainingExample {
        TrainingExample {
            source_run: Uuid::new_v4(),
            domain: domain.into(),
            prompt: "p".into(),
            teacher_output: "t".into(),
            student_output: "s".into(),
            teacher_score: 80.0,
            student_score: 80.0 - reward * 100.0,
            reward,
        }
    }

    #[test]
    fn identical_weights_have_zero_divergence() {
        let w: BTreeMap<String, f64> = [("a".to_string(), 0.3), ("b".to_string(), -0.1)].into();
        let domains: BTreeSet<String> = ["a".to_string(), "b".to_string()].into();
        assert!(divergence(&w, &w, &domains).abs() < 1e-12);
    }

    #[test]
    fn small_step_is_accepted_at_full_scale() {
        let config = TrainerConfig::default();
        let update = propose_update(
            &PolicyParameters::default(),
            &[example("energy", 0.1), example("energy", 0.1)],
            &config,
            &["markets".to_string()],
        )
        .unwrap();
        assert_eq!(update.step_scale, 1.0);
        assert!((update.parameters.weight("energy") - 0.05).abs() < 1e-12);
        assert!(update.divergence <= config.max_divergence);
        assert!((update.mean_reward - 0.1).abs() < 1e-12);
    }

    #[test]
    fn large_step_backtracks_into_budget() {
        let config = TrainerConfig {
            learning_rate: 2.0,
            ..TrainerConfig::default()
        };
        let update = propose_update(
            &PolicyParameters::default(),
            &[example("energy", 1.0)],
            &config,
            &["markets".to_string()],
        )
        .unwrap();
        assert_eq!(update.step_scale, 0.25);
        assert!(update.divergence <= config.max_divergence);
        assert!((update.parameters.weight("energy") - 0.5).abs() < 1e-12);
    }

    #[test]
    fn hopeless_step_exceeds_budget() {
        let config = TrainerConfig {
            learning_rate: 50.0,
            max_backtracks: 1,
            ..TrainerConfig::default()
        };
        let err = propose_update(
            &PolicyParameters::default(),
            &[example("energy", 1.0)],
            &config,
            &["markets".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::DivergenceBudgetExceeded { .. }));
        assert!(err.is_skip());
    }

    #[test]
    fn zero_rewards_are_no_signal() {
        let err = propose_update(
            &PolicyParameters::default(),
            &[example("energy", 0.0)],
            &TrainerConfig::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::NoSignal { examples: 1 }));
    }
}
