//! Fixed evaluation suite and its scorer.
//!
//! A case scores the fraction of its expected keywords that appear in the
//! policy's answer. The aggregate is the mean case score, in 0.0–1.0.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use hive_state::PolicyVersion;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::GovernorError;
use crate::gateway::{GenerationConstraints, ModelGateway, Purpose};
use crate::retry::RetryPolicy;

const CASE_MAX_TOKENS: u32 = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub case_id: String,
    pub domain: String,
    pub prompt: String,
    pub expected_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    pub suite_id: String,
    /// Aggregate a version needs for its run to count as passing.
    pub pass_score: f64,
    pub cases: Vec<BenchmarkCase>,
}

impl BenchmarkSuite {
    /// Small general-purpose suite used when no suite file is configured.
    pub fn builtin() -> Self {
        let case = |id: &str, domain: &str, prompt: &str, kw: &[&str]| BenchmarkCase {
            case_id: id.into(),
            domain: domain.into(),
            prompt: prompt.into(),
            expected_keywords: kw.iter().map(|k| k.to_string()).collect(),
        };
        Self {
            suite_id: "builtin-v1".into(),
            pass_score: 0.5,
            cases: vec![
                case(
                    "supply-chain",
                    "markets",
                    "Summarise the main supply risks for lithium-ion battery materials.",
                    &["lithium", "cobalt", "nickel", "supply", "risk"],
                ),
                case(
                    "energy-policy",
                    "policy",
                    "Outline how export restrictions affect rare earth element prices.",
                    &["export", "rare earth", "prices", "restrictions"],
                ),
                case(
                    "technology",
                    "technology",
                    "Describe current approaches to recycling battery cathode materials.",
                    &["recycling", "cathode", "battery", "recovery"],
                ),
            ],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GovernorError> {
        let bytes = std::fs::read(path)?;
        let suite: Self = serde_json::from_slice(&bytes)?;
        suite.validate()?;
        Ok(suite)
    }

    pub fn validate(&self) -> Result<(), GovernorError> {
        if self.cases.is_empty() {
            return Err(GovernorError::InvalidSuite("suite has no cases".into()));
        }
        if !(0.0..=1.0).contains(&self.pass_score) {
            return Err(GovernorError::InvalidSuite("pass_score must lie in 0..=1".into()));
        }
        let mut ids = HashSet::new();
        for case in &self.cases {
            if !ids.insert(case.case_id.as_str()) {
                return Err(GovernorError::InvalidSuite(format!(
                    "duplicate case id '{}'",
                    case.case_id
                )));
            }
        }
        Ok(())
    }

    /// Distinct case domains, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut d: Vec<String> = self.cases.iter().map(|c| c.domain.clone()).collect();
        d.sort();
        d.dedup();
        d
    }
}

/// Fraction of expected keywords present in `answer` (case-insensitive).
/// A case with no keywords scores 1.0 for any non-empty answer.
pub fn score_case(case: &BenchmarkCase, answer: &str) -> f64 {
    let answer = answer.to_lowercase();
    if case.expected_keywords.is_empty() {
        return if answer.trim().is_empty() { 0.0 } else { 1.0 };
    }
    let hits = case
        .expected_keywords
        .iter()
        .filter(|k| answer.contains(&k.to_lowercase()))
        .count();
    hits as f64 / case.expected_keywords.len() as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuiteScore {
    pub aggregate: f64,
    pub case_scores: BTreeMap<String, f64>,
}

pub struct SuiteRunner {
    gateway: Arc<dyn ModelGateway>,
    retry: RetryPolicy,
}

impl SuiteRunner {
    pub fn new(gateway: Arc<dyn ModelGateway>, retry: RetryPolicy) -> Self {
        Self { gateway, retry }
    }

    /// Run every case against `version`. A case whose generation fails
    /// scores zero.
    pub async fn score(&self, suite: &BenchmarkSuite, version: &PolicyVersion) -> SuiteScore {
        let constraints = GenerationConstraints::new(Purpose::Benchmark, CASE_MAX_TOKENS);
        let runs = suite.cases.iter().map(|case| {
            let constraints = &constraints;
            async move {
                let answer = self
                    .retry
                    .run("benchmark", || {
                        self.gateway
                            .generate(version.version_id, &case.prompt, constraints)
                    })
                    .await;
                let score = match answer {
                    Ok(g) => score_case(case, &g.text),
                    Err(e) => {
                        warn!(
                            case = %case.case_id,
                            version = %version.version_id,
                            error = %e,
                            "benchmark case failed"
                        );
                        0.0
                    }
                };
                (case.case_id.clone(), score)
            }
        });
        let case_scores: BTreeMap<String, f64> = join_all(runs).await.into_iter().collect();
        let aggregate = if case_scores.is_empty() {
            0.0
        } else {
            case_scores.values().sum::<f64>() / case_scores.len() as f64
        };
        SuiteScore {
            aggregate,
            case_scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fakes::{Reply, ScriptedGateway};
    use crate::gateway::GatewayError;
    use chrono::Utc;
    use hive_state::{PolicyParameters, VersionId, VersionOrigin};

    fn version(id: u64) -> PolicyVersion {
        PolicyVersion {
            version_id: VersionId(id),
            parent: None,
            parameters: PolicyParameters::default(),
            origin: VersionOrigin::Seed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn keyword_coverage_scoring() {
        let case = &BenchmarkSuite::builtin().cases[1];
        assert_eq!(score_case(case, "Export RESTRICTIONS lift rare earth prices"), 1.0);
        assert_eq!(score_case(case, "prices"), 0.25);
        assert_eq!(score_case(case, ""), 0.0);
    }

    #[test]
    fn builtin_suite_is_valid() {
        let suite = BenchmarkSuite::builtin();
        suite.validate().unwrap();
        assert_eq!(suite.domains(), ["markets", "policy", "technology"]);
    }

    #[test]
    fn duplicate_case_ids_are_rejected() {
        let mut suite = BenchmarkSuite::builtin();
        suite.cases.push(suite.cases[0].clone());
        assert!(matches!(suite.validate(), Err(GovernorError::InvalidSuite(_))));
    }

    #[test]
    fn suite_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(&path, serde_json::to_vec(&BenchmarkSuite::builtin()).unwrap()).unwrap();
        assert_eq!(BenchmarkSuite::load(&path).unwrap(), BenchmarkSuite::builtin());
    }

    #[tokio::test]
    async fn failed_cases_score_zero() {
        let gw = ScriptedGateway::new(|call| {
            if call.prompt.contains("lithium") {
                Reply::error(GatewayError::Unavailable("down".into()))
            } else {
                Reply::text(
                    "export restrictions push rare earth prices; \
                     recycling cathode battery recovery",
                )
            }
        });
        let runner = SuiteRunner::new(Arc::new(gw), RetryPolicy::none());
        let score = runner.score(&BenchmarkSuite::builtin(), &version(1)).await;
        assert_eq!(score.case_scores["supply-chain"], 0.0);
        assert_eq!(score.case_scores["energy-policy"], 1.0);
        assert!((score.aggregate - 2.0 / 3.0).abs() < 1e-9);
    }
}
