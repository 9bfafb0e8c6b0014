//! Validation tree: leaf reviewers, one aggregation rule at the root.
//!
//! Leaves run concurrently. The root computes a weighted mean and passes
//! the run only when the mean meets `pass_score` and no dimension falls
//! below `floor_score`. A failing verdict may trigger at most one revision
//! pass by the Observer; whichever verdict set is better is kept.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use hive_state::VersionId;
use tracing::{debug, instrument};

use crate::agents::{Agent, AgentError, AgentInput, Reviewer};
use crate::config::ValidationConfig;
use crate::domain::{SynthesizedContext, ValidationSummary, ValidationVerdict};
use crate::gateway::ModelGateway;
use crate::obs;
use crate::retry::RetryPolicy;

/// Root rule combining leaf verdicts.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRule {
    pub weights: BTreeMap<String, f64>,
    pub pass_score: f64,
    pub floor_score: f64,
}

impl AggregationRule {
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self {
            weights: config
                .dimensions
                .iter()
                .map(|d| (d.name.clone(), d.weight))
                .collect(),
            pass_score: config.pass_score,
            floor_score: config.floor_score,
        }
    }

    pub fn aggregate(&self, verdicts: Vec<ValidationVerdict>) -> ValidationSummary {
        let (weighted, total_weight) = verdicts.iter().fold((0.0, 0.0), |(sum, w), v| {
            let weight = self.weights.get(&v.dimension).copied().unwrap_or(1.0);
            (sum + weight * v.score, w + weight)
        });
        let overall_score = if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        };
        let failing_dimensions: Vec<String> = verdicts
            .iter()
            .filter(|v| v.score < self.floor_score)
            .map(|v| v.dimension.clone())
            .collect();
        let passed = !verdicts.is_empty()
            && overall_score >= self.pass_score
            && failing_dimensions.is_empty();

        let mut ordered: Vec<&ValidationVerdict> = verdicts.iter().collect();
        ordered.sort_by(|a, b| a.score.total_cmp(&b.score));
        let mut notes: Vec<String> = Vec::new();
        for note in ordered.iter().flat_map(|v| v.notes.iter()) {
            if !notes.contains(note) {
                notes.push(note.clone());
            }
        }

        ValidationSummary {
            verdicts,
            overall_score,
            passed,
            failing_dimensions,
            notes,
            revision_rounds: 0,
        }
    }
}

pub struct ValidationTree {
    leaves: Vec<Agent>,
    rule: AggregationRule,
}

impl ValidationTree {
    /// One reviewer leaf per configured dimension.
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        retry: RetryPolicy,
        config: &ValidationConfig,
    ) -> Self {
        let leaves = config
            .dimensions
            .iter()
            .map(|d| Agent::Reviewer(Reviewer::new(&d.name, gateway.clone(), retry.clone())))
            .collect();
        Self {
            leaves,
            rule: AggregationRule::from_config(config),
        }
    }

    pub fn rule(&self) -> &AggregationRule {
        &self.rule
    }

    /// Score `context` once, all leaves concurrently.
    pub async fn evaluate(
        &self,
        context: &SynthesizedContext,
        policy: VersionId,
    ) -> Result<ValidationSummary, AgentError> {
        let reviews = self.leaves.iter().map(|leaf| {
            leaf.execute(AgentInput::Review {
                context: context.clone(),
                policy,
            })
        });
        let verdicts = join_all(reviews)
            .await
            .into_iter()
            .map(|out| out.and_then(|o| o.into_verdict()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.rule.aggregate(verdicts))
    }

    /// Evaluate, and on failure request one revision from `observer`.
    /// Returns the context and summary of the better round.
    #[instrument(skip_all, fields(policy = %policy))]
    pub async fn finalize(
        &self,
        context: SynthesizedContext,
        observer: &Agent,
        policy: VersionId,
    ) -> Result<(SynthesizedContext, ValidationSummary), AgentError> {
        let first = self.evaluate(&context, policy).await?;
        if first.passed {
            obs::emit_validation_completed(first.overall_score, true, 0);
            return Ok((context, first));
        }

        debug!(overall = first.overall_score, "validation failed, requesting revision");
        let revised = observer
            .execute(AgentInput::Revise {
                context: context.clone(),
                notes: first.notes.clone(),
                policy,
            })
            .await?
            .into_context()?;

        let (context, mut summary) = if revised.revision == context.revision {
            (context, first)
        } else {
            let second = self.evaluate(&revised, policy).await?;
            if second.better_than(&first) {
                (revised, second)
            } else {
                (context, first)
            }
        };
        summary.revision_rounds = 1;
        obs::emit_validation_completed(summary.overall_score, summary.passed, 1);
        Ok((context, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DimensionConfig, ObserverConfig};
    use crate::agents::Observer;
    use crate::gateway::fakes::{Reply, ScriptedGateway};
    use crate::gateway::{GatewayError, Purpose};

    fn verdict(dim: &str, score: f64) -> ValidationVerdict {
        ValidationVerdict {
            dimension: dim.into(),
            score,
            notes: vec![format!("improve {dim}")],
            available: true,
        }
    }

    #[test]
    fn weighted_mean_and_floor() {
        let mut config = ValidationConfig::default();
        config.dimensions[0].weight = 2.0; // factual
        let rule = AggregationRule::from_config(&config);

        let s = rule.aggregate(vec![
            verdict("factual", 90.0),
            verdict("risk", 60.0),
            verdict("completeness", 70.0),
        ]);
        assert!((s.overall_score - 77.5).abs() < 1e-9);
        assert!(s.passed);

        let s = rule.aggregate(vec![
            verdict("factual", 100.0),
            verdict("risk", 30.0),
            verdict("completeness", 100.0),
        ]);
        assert!(s.overall_score >= 70.0);
        assert!(!s.passed);
        assert_eq!(s.failing_dimensions, ["risk"]);
        assert_eq!(s.notes[0], "improve risk");
    }

    #[test]
    fn no_verdicts_never_pass() {
        let rule = AggregationRule::from_config(&ValidationConfig {
            pass_score: 0.0,
            floor_score: 0.0,
            dimensions: Vec::new(),
        });
        assert!(!rule.aggregate(Vec::new()).passed);
    }

    fn single_dim() -> ValidationConfig {
        ValidationConfig {
            dimensions: vec![DimensionConfig {
                name: "factual".into(),
                weight: 1.0,
            }],
            ..ValidationConfig::default()
        }
    }

    #[tokio::test]
    async fn revision_that_helps_is_kept() {
        let gw = Arc::new(ScriptedGateway::new(|call| match call.purpose {
            Purpose::Revise => Reply::text("revised body"),
            Purpose::Review if call.material().contains("revised body") => Reply::text("SCORE: 85"),
            Purpose::Review => Reply::text("SCORE: 50\nNOTES: add sources"),
            _ => Reply::error(GatewayError::Unavailable("unexpected".into())),
        }));
        let tree = ValidationTree::new(gw.clone(), RetryPolicy::none(), &single_dim());
        let observer = Agent::Observer(Observer::new(
            gw.clone(),
            RetryPolicy::none(),
            &ObserverConfig::default(),
        ));
        let (ctx, summary) = tree
            .finalize(SynthesizedContext::from_text("header\nbody"), &observer, VersionId::SEED)
            .await
            .unwrap();
        assert!(summary.passed);
        assert_eq!(summary.revision_rounds, 1);
        assert_eq!(ctx.revision, 1);
        assert!(ctx.text.contains("revised body"));
        assert_eq!(gw.calls_for(Purpose::Revise).len(), 1);
    }

    #[tokio::test]
    async fn worse_revision_is_discarded() {
        let gw = Arc::new(ScriptedGateway::new(|call| match call.purpose {
            Purpose::Revise => Reply::text("worse"),
            Purpose::Review if call.material().contains("worse") => Reply::text("SCORE: 20"),
            _ => Reply::text("SCORE: 50"),
        }));
        let tree = ValidationTree::new(gw.clone(), RetryPolicy::none(), &single_dim());
        let observer = Agent::Observer(Observer::new(
            gw.clone(),
            RetryPolicy::none(),
            &ObserverConfig::default(),
        ));
        let (ctx, summary) = tree
            .finalize(SynthesizedContext::from_text("original"), &observer, VersionId::SEED)
            .await
            .unwrap();
        assert!(!summary.passed);
        assert_eq!(summary.overall_score, 50.0);
        assert_eq!(summary.revision_rounds, 1);
        assert_eq!(ctx.text, "original");
        // Only one revision round, however bad the result.
        assert_eq!(gw.calls_for(Purpose::Revise).len(), 1);
    }

    #[tokio::test]
    async fn unreachable_reviewer_scores_zero_and_fails() {
        let gw = Arc::new(ScriptedGateway::new(|call| match call.purpose {
            Purpose::Review => Reply::error(GatewayError::Unavailable("down".into())),
            _ => Reply::text("x"),
        }));
        let tree = ValidationTree::new(gw, RetryPolicy::none(), &ValidationConfig::default());
        let summary = tree
            .evaluate(&SynthesizedContext::from_text("t"), VersionId::SEED)
            .await
            .unwrap();
        assert_eq!(summary.verdicts.len(), 3);
        assert!(summary.verdicts.iter().all(|v| !v.available));
        assert!(!summary.passed);
    }
}
