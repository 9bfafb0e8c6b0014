//! Result synthesis.
//!
//! `synthesize` is a pure function of the task results: it reads only the
//! `findings` field, orders results by task id, and packs them into at most
//! `max_context_bytes`. The same set of results always produces the same
//! text, regardless of completion order. `revise` is the one model-backed
//! step, used when validation asks for a second pass.

use std::sync::Arc;

use hive_state::VersionId;
use tracing::warn;

use crate::config::ObserverConfig;
use crate::domain::{Coverage, Query, SynthesizedContext, TaskResult, TaskStatus};
use crate::gateway::{GenerationConstraints, ModelGateway, Purpose, MATERIAL_SEPARATOR};
use crate::retry::RetryPolicy;
use crate::text::clip;

const QUESTION_BYTES: usize = 160;
const MISSING_BYTES: usize = 200;

pub struct Observer {
    gateway: Arc<dyn ModelGateway>,
    retry: RetryPolicy,
    max_bytes: usize,
}

/// Sort key placing `task-2` before `task-10`.
fn task_order(task_id: &str) -> (Option<u64>, &str) {
    let ordinal = task_id
        .rsplit('-')
        .next()
        .and_then(|n| n.parse::<u64>().ok());
    (ordinal, task_id)
}

fn render_block(result: &TaskResult) -> String {
    let mut block = format!("[{}] {}", result.task_id, result.findings.summary.trim());
    if result.status == TaskStatus::Partial {
        block.push_str(" (partial)");
    }
    for point in &result.findings.key_points {
        block.push_str("\n- ");
        block.push_str(point);
    }
    block
}

impl Observer {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        retry: RetryPolicy,
        config: &ObserverConfig,
    ) -> Self {
        Self {
            gateway,
            retry,
            max_bytes: config.max_context_bytes,
        }
    }

    pub fn synthesize(&self, query: &Query, results: &[TaskResult]) -> SynthesizedContext {
        let mut ordered: Vec<&TaskResult> = results.iter().collect();
        ordered.sort_by(|a, b| task_order(&a.task_id).cmp(&task_order(&b.task_id)));

        let total = ordered.len();
        let ok = ordered
            .iter()
            .filter(|r| r.status == TaskStatus::Ok && r.is_usable())
            .count();
        let usable: Vec<&TaskResult> = ordered.iter().copied().filter(|r| r.is_usable()).collect();
        let partial = usable.len() - ok;
        let missing: Vec<String> = ordered
            .iter()
            .filter(|r| !r.is_usable())
            .map(|r| r.task_id.clone())
            .collect();

        let coverage = if usable.is_empty() {
            Coverage::None
        } else if ok == total {
            Coverage::Full
        } else {
            Coverage::Partial
        };
        let confidence = if total == 0 {
            0.0
        } else {
            (ok as f64 + 0.5 * partial as f64) / total as f64
        };

        let mut header = format!(
            "coverage: {coverage} ({}/{total} tasks usable, confidence {confidence:.2})\nquestion: {}",
            usable.len(),
            clip(query.text.trim(), QUESTION_BYTES),
        );
        if !missing.is_empty() {
            header.push_str("\nmissing: ");
            header.push_str(&clip(&missing.join(", "), MISSING_BYTES));
        }

        let mut text = header;
        if !usable.is_empty() {
            let remaining = self.max_bytes.saturating_sub(text.len());
            // Each block is preceded by a blank line.
            let per_block = (remaining / usable.len()).saturating_sub(2);
            for result in &usable {
                text.push_str("\n\n");
                text.push_str(&clip(&render_block(result), per_block));
            }
        }

        SynthesizedContext {
            text: clip(&text, self.max_bytes),
            coverage,
            confidence,
            task_count: total,
            usable_count: usable.len(),
            missing_tasks: missing,
            revision: 0,
        }
    }

    /// Ask the model to address reviewer notes. The coverage line is kept
    /// verbatim and the byte bound still holds. On gateway failure the
    /// context comes back unchanged.
    pub async fn revise(
        &self,
        context: &SynthesizedContext,
        notes: &[String],
        policy: VersionId,
    ) -> SynthesizedContext {
        let notes_list = notes
            .iter()
            .map(|n| format!("- {n}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Revise the research synthesis below so it addresses these reviewer notes. \
             Keep its first line unchanged and do not invent sources.\n{notes_list}\
             {MATERIAL_SEPARATOR}{}",
            context.text
        );
        let max_tokens = u32::try_from(self.max_bytes / 3).unwrap_or(u32::MAX);
        let constraints = GenerationConstraints::new(Purpose::Revise, max_tokens);

        let generation = match self
            .retry
            .run("revise", || self.gateway.generate(policy, &prompt, &constraints))
            .await
        {
            Ok(g) => g,
            Err(e) => {
                warn!(error = %e, "revision failed, keeping original synthesis");
                return context.clone();
            }
        };

        let header = context.text.lines().next().unwrap_or_default();
        let body = generation.text.trim();
        let body = body.strip_prefix(header).unwrap_or(body).trim_start();
        let text = if body.is_empty() {
            context.text.clone()
        } else {
            clip(&format!("{header}\n{body}"), self.max_bytes)
        };

        SynthesizedContext {
            text,
            revision: context.revision + 1,
            ..context.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Findings;
    use crate::gateway::fakes::{EchoGateway, Reply, ScriptedGateway};
    use crate::gateway::GatewayError;

    fn result(id: &str, status: TaskStatus, summary: &str) -> TaskResult {
        TaskResult {
            task_id: id.into(),
            status,
            findings: Findings {
                summary: summary.into(),
                key_points: vec![format!("{summary} point")],
            },
            citations: vec!["secret-source".into()],
            token_cost: 10,
            steps: 1,
            error: None,
        }
    }

    fn observer(max: usize) -> Observer {
        Observer::new(
            Arc::new(EchoGateway),
            RetryPolicy::none(),
            &ObserverConfig {
                max_context_bytes: max,
            },
        )
    }

    #[test]
    fn classification_and_confidence() {
        let q = Query::new("d", "q");
        let obs = observer(2048);
        let ctx = obs.synthesize(
            &q,
            &[
                result("task-1", TaskStatus::Ok, "a"),
                result("task-2", TaskStatus::Partial, "b"),
                TaskResult::failed("task-3", "timeout"),
                result("task-4", TaskStatus::Ok, "d"),
            ],
        );
        assert_eq!(ctx.coverage, Coverage::Partial);
        assert_eq!(ctx.usable_count, 3);
        assert_eq!(ctx.missing_tasks, ["task-3"]);
        assert!((ctx.confidence - 2.5 / 4.0).abs() < 1e-9);
        assert!(ctx.text.starts_with("coverage: partial"));
        assert!(!ctx.text.contains("secret-source"));
    }

    #[test]
    fn all_failed_is_no_coverage() {
        let ctx = observer(2048).synthesize(
            &Query::new("d", "q"),
            &[TaskResult::failed("task-1", "x"), TaskResult::failed("task-2", "y")],
        );
        assert_eq!(ctx.coverage, Coverage::None);
        assert_eq!(ctx.confidence, 0.0);
    }

    #[test]
    fn numeric_task_order() {
        let ctx = observer(4096).synthesize(
            &Query::new("d", "q"),
            &[
                result("task-10", TaskStatus::Ok, "ten"),
                result("task-2", TaskStatus::Ok, "two"),
            ],
        );
        let two = ctx.text.find("[task-2]").unwrap();
        let ten = ctx.text.find("[task-10]").unwrap();
        assert!(two < ten);
    }

    #[tokio::test]
    async fn revision_keeps_header_and_bound() {
        let gw = ScriptedGateway::new(|_| Reply::text("x ".repeat(2000)));
        let obs = Observer::new(Arc::new(gw), RetryPolicy::none(), &ObserverConfig::default());
        let ctx = obs.synthesize(&Query::new("d", "q"), &[result("task-1", TaskStatus::Ok, "a")]);
        let revised = obs.revise(&ctx, &["cite more".into()], VersionId::SEED).await;
        assert_eq!(revised.revision, 1);
        assert_eq!(revised.text.lines().next(), ctx.text.lines().next());
        assert!(revised.text.len() <= 2048);
        assert_eq!(revised.coverage, ctx.coverage);
    }

    #[tokio::test]
    async fn failed_revision_returns_original() {
        let gw = ScriptedGateway::new(|_| Reply::error(GatewayError::Unavailable("down".into())));
        let obs = Observer::new(Arc::new(gw), RetryPolicy::none(), &ObserverConfig::default());
        let ctx = obs.synthesize(&Query::new("d", "q"), &[result("task-1", TaskStatus::Ok, "a")]);
        let revised = obs.revise(&ctx, &[], VersionId::SEED).await;
        assert_eq!(revised, ctx);
    }
}
