//! Leaf reviewer: scores a synthesis on one dimension.

use std::sync::{Arc, OnceLock};

use hive_state::VersionId;
use regex::Regex;
use tracing::warn;

use crate::domain::{SynthesizedContext, ValidationVerdict};
use crate::gateway::{
    GatewayError, GenerationConstraints, ModelGateway, Purpose, MATERIAL_SEPARATOR,
};
use crate::retry::RetryPolicy;
use crate::text::clip;

const REVIEW_MAX_TOKENS: u32 = 256;
const MAX_NOTES: usize = 4;
const NOTE_BYTES: usize = 240;

fn score_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bscore\s*[:=]\s*(\d{1,3}(?:\.\d+)?)").ok())
        .as_ref()
}

/// Parse `SCORE: n` (clamped to 0–100) and the remaining lines as notes.
pub fn parse_review(text: &str) -> Result<(f64, Vec<String>), GatewayError> {
    let re = score_line().ok_or_else(|| GatewayError::Malformed("score pattern".into()))?;
    let score = re
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .ok_or_else(|| GatewayError::Malformed("review has no SCORE line".into()))?;
    let notes = text
        .lines()
        .filter(|l| !re.is_match(l))
        .map(|l| {
            let l = l.trim();
            let l = l
                .strip_prefix("NOTES:")
                .or_else(|| l.strip_prefix("Notes:"))
                .unwrap_or(l);
            l.trim_start_matches(['-', '*']).trim()
        })
        .filter(|l| !l.is_empty())
        .take(MAX_NOTES)
        .map(|l| clip(l, NOTE_BYTES))
        .collect();
    Ok((score.clamp(0.0, 100.0), notes))
}

pub struct Reviewer {
    dimension: String,
    gateway: Arc<dyn ModelGateway>,
    retry: RetryPolicy,
}

impl Reviewer {
    pub fn new(
        dimension: impl Into<String>,
        gateway: Arc<dyn ModelGateway>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            dimension: dimension.into(),
            gateway,
            retry,
        }
    }

    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    /// Score `context`. An unreachable or unparseable reviewer yields a
    /// zero score marked unavailable.
    pub async fn review(
        &self,
        context: &SynthesizedContext,
        policy: VersionId,
    ) -> ValidationVerdict {
        let prompt = format!(
            "Review the research synthesis below for {dim}. Reply with a line \
             'SCORE: <0-100>' followed by 'NOTES:' and concrete improvements.\
             {MATERIAL_SEPARATOR}{text}",
            dim = self.dimension,
            text = context.text
        );
        let constraints = GenerationConstraints::new(Purpose::Review, REVIEW_MAX_TOKENS);
        let outcome = self
            .retry
            .run("review", || async {
                let g = self.gateway.generate(policy, &prompt, &constraints).await?;
                parse_review(&g.text)
            })
            .await;

        match outcome {
            Ok((score, notes)) => ValidationVerdict {
                dimension: self.dimension.clone(),
                score,
                notes,
                available: true,
            },
            Err(e) => {
                warn!(dimension = %self.dimension, error = %e, "reviewer unavailable");
                ValidationVerdict {
                    dimension: self.dimension.clone(),
                    score: 0.0,
                    notes: vec![format!("{} reviewer unavailable: {e}", self.dimension)],
                    available: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fakes::{Reply, ScriptedGateway};

    #[test]
    fn parses_score_and_notes() {
        let (score, notes) =
            parse_review("SCORE: 82\nNOTES: cite the 2023 USGS survey\n- quantify risk").unwrap();
        assert_eq!(score, 82.0);
        assert_eq!(notes, ["cite the 2023 USGS survey", "quantify risk"]);
    }

    #[test]
    fn clamps_and_rejects() {
        assert_eq!(parse_review("score = 140").unwrap().0, 100.0);
        assert!(parse_review("looks fine to me").is_err());
    }

    #[tokio::test]
    async fn malformed_reviews_are_retried_then_zeroed() {
        let gw = Arc::new(ScriptedGateway::new(|_| Reply::text("no score here")));
        let retry = RetryPolicy {
            initial_delay: std::time::Duration::ZERO,
            ..RetryPolicy::default()
        };
        let reviewer = Reviewer::new("factual", gw.clone(), retry);
        let verdict = reviewer
            .review(&SynthesizedContext::from_text("text"), VersionId::SEED)
            .await;
        assert!(!verdict.available);
        assert_eq!(verdict.score, 0.0);
        assert_eq!(gw.calls().len(), 3);
    }
}
