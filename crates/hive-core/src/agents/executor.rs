//! Isolated task execution.
//!
//! An executor sees only its `TaskSpec`. Intermediate notes live in a
//! private scratch that is dropped when `execute` returns; only bounded
//! [`Findings`] and citations leave. The loop is bounded twice: by
//! `max_steps` (every search or model call is a step) and by the token
//! budget. Hitting either bound yields a `partial` result.

use std::sync::Arc;

use hive_state::VersionId;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::ExecutorConfig;
use crate::domain::{Findings, TaskResult, TaskSpec, TaskStatus};
use crate::gateway::{
    Generation, GatewayError, GenerationConstraints, ModelGateway, Purpose, SearchFilters,
    SearchHit, SearchProvider, MATERIAL_SEPARATOR,
};
use crate::memory::{assemble_context, ContextBudget, MemoryQuery, ObservationalMemory};
use crate::obs;
use crate::retry::RetryPolicy;
use crate::text::clip;

const KEY_POINT_BYTES: usize = 200;
const CITATION_BYTES: usize = 200;

/// Working state of one task. Never leaves this module.
#[derive(Default)]
struct Scratch {
    notes: Vec<String>,
    hits: Vec<SearchHit>,
    memory: Option<String>,
    steps: u32,
    tokens: u64,
}

enum Stop {
    Final,
    StepLimit,
    TokenBudget,
    Cancelled,
    Gateway(GatewayError),
}

pub struct TaskExecutor {
    gateway: Arc<dyn ModelGateway>,
    search: Arc<dyn SearchProvider>,
    memory: Arc<dyn ObservationalMemory>,
    retry: RetryPolicy,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        search: Arc<dyn SearchProvider>,
        memory: Arc<dyn ObservationalMemory>,
        retry: RetryPolicy,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            search,
            memory,
            retry,
            config: config.clone(),
        }
    }

    fn prompt(&self, spec: &TaskSpec, scratch: &Scratch) -> String {
        let mut prompt = format!(
            "Objective: {}\nSuccess criteria: {}\n",
            spec.objective, spec.success_criteria
        );
        if let Some(query) = spec.input("query") {
            prompt.push_str(&format!("Overall question (context only): {query}\n"));
        }
        if let Some(memory) = &scratch.memory {
            prompt.push_str("\nRelevant prior findings:\n");
            prompt.push_str(memory);
            prompt.push('\n');
        }
        if !scratch.hits.is_empty() {
            prompt.push_str("\nSources:\n");
            for hit in &scratch.hits {
                prompt.push_str(&format!("- ({}) {}\n", hit.source, hit.snippet));
            }
        }
        if !scratch.notes.is_empty() {
            prompt.push_str("\nYour notes so far:\n");
            prompt.push_str(&scratch.notes.join("\n"));
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "\nAnswer with a short summary followed by '-' bullet key points. \
             If you need another step, start your reply with '{}'.",
            self.config.continue_marker
        ));
        prompt.push_str(MATERIAL_SEPARATOR);
        prompt.push_str(&spec.objective);
        prompt
    }

    async fn gather(&self, spec: &TaskSpec, scratch: &mut Scratch) {
        if let Some(domain) = spec.input("domain") {
            let query = MemoryQuery::new(&spec.objective, self.config.memory_snippets)
                .in_domain(domain);
            match self.memory.lookup(&query).await {
                Ok(hits) => {
                    let budget = ContextBudget::new(self.config.memory_token_budget);
                    scratch.memory = assemble_context(&hits, budget).render();
                }
                Err(e) => warn!(task_id = %spec.task_id, error = %e, "memory lookup failed"),
            }
        }

        if self.config.search_results == 0 || scratch.steps >= spec.max_steps {
            return;
        }
        let filters = SearchFilters {
            domain: spec.input("domain").map(str::to_string),
            limit: self.config.search_results,
        };
        scratch.steps += 1;
        match self
            .retry
            .run("search", || self.search.query(&spec.objective, &filters))
            .await
        {
            Ok(mut hits) => {
                hits.truncate(self.config.search_results);
                scratch.hits = hits;
            }
            Err(e) => {
                warn!(task_id = %spec.task_id, error = %e, "search failed, continuing without sources")
            }
        }
    }

    async fn step(
        &self,
        spec: &TaskSpec,
        policy: VersionId,
        scratch: &Scratch,
        max_tokens: u32,
    ) -> Result<Generation, GatewayError> {
        let prompt = self.prompt(spec, scratch);
        let constraints = GenerationConstraints::new(Purpose::Execute, max_tokens);
        self.retry
            .run("execute", || async {
                let generation = self.gateway.generate(policy, &prompt, &constraints).await?;
                if generation.text.trim().is_empty() {
                    return Err(GatewayError::Malformed("empty generation".into()));
                }
                Ok(generation)
            })
            .await
    }

    async fn run_loop(
        &self,
        spec: &TaskSpec,
        policy: VersionId,
        cancel: &CancelToken,
        scratch: &mut Scratch,
    ) -> Stop {
        loop {
            if cancel.is_cancelled() {
                return Stop::Cancelled;
            }
            if scratch.steps >= spec.max_steps {
                return Stop::StepLimit;
            }
            let remaining = spec.max_tokens_budget.saturating_sub(scratch.tokens);
            if remaining == 0 {
                return Stop::TokenBudget;
            }
            let max_tokens = u32::try_from(remaining).unwrap_or(u32::MAX);

            scratch.steps += 1;
            let generation = match self.step(spec, policy, scratch, max_tokens).await {
                Ok(g) => g,
                Err(e) => return Stop::Gateway(e),
            };
            scratch.tokens += generation.usage.total();

            let text = generation.text.trim();
            let (more, note) = match text.strip_prefix(self.config.continue_marker.as_str()) {
                Some(rest) => (true, rest.trim()),
                None => (false, text),
            };
            if !note.is_empty() {
                scratch.notes.push(note.to_string());
            }
            if scratch.tokens > spec.max_tokens_budget {
                return Stop::TokenBudget;
            }
            if !more {
                return Stop::Final;
            }
            debug!(task_id = %spec.task_id, step = scratch.steps, "executor continuing");
        }
    }

    fn extract(&self, scratch: &Scratch) -> Findings {
        let mut summary_lines = Vec::new();
        let mut key_points = Vec::new();
        for line in scratch.notes.iter().flat_map(|n| n.lines()) {
            let line = line.trim();
            if let Some(point) = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.strip_prefix("• "))
            {
                if key_points.len() < self.config.max_key_points && !point.trim().is_empty() {
                    key_points.push(clip(point.trim(), KEY_POINT_BYTES));
                }
            } else if !line.is_empty() {
                summary_lines.push(line);
            }
        }
        Findings {
            summary: clip(&summary_lines.join(" "), self.config.max_summary_bytes),
            key_points,
        }
    }

    fn citations(&self, scratch: &Scratch) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for hit in &scratch.hits {
            let source = clip(&hit.source, CITATION_BYTES);
            if !out.contains(&source) {
                out.push(source);
            }
        }
        out
    }

    /// Run one task to a terminal status. Never returns an error: failures
    /// are reported in the result.
    #[instrument(skip(self, spec, cancel), fields(task_id = %spec.task_id))]
    pub async fn execute(
        &self,
        spec: &TaskSpec,
        policy: VersionId,
        cancel: &CancelToken,
    ) -> TaskResult {
        let mut scratch = Scratch::default();
        self.gather(spec, &mut scratch).await;
        let stop = self.run_loop(spec, policy, cancel, &mut scratch).await;

        let findings = self.extract(&scratch);
        let (status, error) = match stop {
            Stop::Final => (TaskStatus::Ok, None),
            Stop::StepLimit => (TaskStatus::Partial, Some("step limit reached".to_string())),
            Stop::TokenBudget => (TaskStatus::Partial, Some("token budget exhausted".to_string())),
            Stop::Cancelled => (TaskStatus::Failed, Some("cancelled".to_string())),
            Stop::Gateway(e) if findings.is_empty() => (TaskStatus::Failed, Some(e.to_string())),
            Stop::Gateway(e) => (TaskStatus::Partial, Some(e.to_string())),
        };
        // A bound hit before anything was written leaves nothing usable.
        let status = if status == TaskStatus::Partial && findings.is_empty() {
            TaskStatus::Failed
        } else {
            status
        };

        let result = TaskResult {
            task_id: spec.task_id.clone(),
            status,
            citations: self.citations(&scratch),
            findings,
            token_cost: scratch.tokens,
            steps: scratch.steps,
            error,
        };
        obs::emit_task_finished(&result.task_id, result.status, result.token_cost, result.steps);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::gateway::fakes::{Reply, ScriptedGateway, StaticSearch};
    use crate::gateway::NoSearch;
    use crate::memory::{InMemoryObservationalMemory, MemoryKind, MemoryRecord};

    fn spec(max_steps: u32, budget: u64) -> TaskSpec {
        let mut inputs = BTreeMap::new();
        inputs.insert("domain".to_string(), "minerals".to_string());
        TaskSpec {
            task_id: "task-1".into(),
            objective: "lithium market outlook".into(),
            success_criteria: "covers demand".into(),
            inputs,
            max_steps,
            max_tokens_budget: budget,
        }
    }

    fn executor(gw: ScriptedGateway) -> TaskExecutor {
        TaskExecutor::new(
            Arc::new(gw),
            Arc::new(NoSearch),
            Arc::new(InMemoryObservationalMemory::new()),
            RetryPolicy::none(),
            &ExecutorConfig::default(),
        )
    }

    #[tokio::test]
    async fn final_answer_yields_ok_findings() {
        let exec = executor(ScriptedGateway::new(|_| {
            Reply::text("Demand grows 20% a year.\n- EV batteries dominate\n- Supply lags")
        }));
        let r = exec.execute(&spec(4, 4000), VersionId::SEED, &CancelToken::new()).await;
        assert_eq!(r.status, TaskStatus::Ok);
        assert_eq!(r.findings.summary, "Demand grows 20% a year.");
        assert_eq!(r.findings.key_points.len(), 2);
        assert!(r.token_cost > 0);
    }

    #[tokio::test]
    async fn continuing_past_step_limit_is_partial() {
        let exec = executor(ScriptedGateway::new(|_| Reply::text("CONTINUE: still digging")));
        // One search step plus two generations.
        let r = exec.execute(&spec(3, 4000), VersionId::SEED, &CancelToken::new()).await;
        assert_eq!(r.status, TaskStatus::Partial);
        assert_eq!(r.steps, 3);
        assert_eq!(r.findings.summary, "still digging still digging");
    }

    #[tokio::test]
    async fn token_budget_bounds_the_loop() {
        let long = "x".repeat(400);
        let exec = executor(ScriptedGateway::new(move |_| Reply::text(format!("CONTINUE: {long}"))));
        let r = exec.execute(&spec(10, 150), VersionId::SEED, &CancelToken::new()).await;
        assert_eq!(r.status, TaskStatus::Partial);
        assert_eq!(r.error.as_deref(), Some("token budget exhausted"));
        assert!(r.steps < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_task() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        let gw = ScriptedGateway::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Reply::error(GatewayError::Timeout)
        });
        let exec = TaskExecutor::new(
            Arc::new(gw),
            Arc::new(NoSearch),
            Arc::new(InMemoryObservationalMemory::new()),
            RetryPolicy::default(),
            &ExecutorConfig::default(),
        );
        let r = exec.execute(&spec(4, 4000), VersionId::SEED, &CancelToken::new()).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(r.findings.is_empty());
    }

    #[tokio::test]
    async fn search_hits_become_citations_and_count_as_a_step() {
        let gw = ScriptedGateway::new(|call| {
            assert!(call.prompt.contains("usgs.gov"));
            Reply::text("Prices stabilise.")
        });
        let exec = TaskExecutor::new(
            Arc::new(gw),
            Arc::new(StaticSearch::new(vec![
                StaticSearch::hit("usgs.gov", "lithium production 2023", 0.9),
                StaticSearch::hit("usgs.gov", "duplicate source", 0.5),
            ])),
            Arc::new(InMemoryObservationalMemory::new()),
            RetryPolicy::none(),
            &ExecutorConfig::default(),
        );
        let r = exec.execute(&spec(4, 4000), VersionId::SEED, &CancelToken::new()).await;
        assert_eq!(r.citations, ["usgs.gov"]);
        assert_eq!(r.steps, 2);
    }

    #[tokio::test]
    async fn memory_snippets_reach_the_prompt() {
        let memory = Arc::new(InMemoryObservationalMemory::new());
        memory
            .append(MemoryRecord::new(
                MemoryKind::TaskOutcome,
                "minerals",
                "lithium market",
                "Chile expanded brine output",
                1.0,
            ))
            .await
            .unwrap();
        let gw = Arc::new(ScriptedGateway::new(|_| Reply::text("ok")));
        let exec = TaskExecutor::new(
            gw.clone(),
            Arc::new(NoSearch),
            memory,
            RetryPolicy::none(),
            &ExecutorConfig::default(),
        );
        exec.execute(&spec(4, 4000), VersionId::SEED, &CancelToken::new()).await;
        assert!(gw.calls()[0].prompt.contains("Chile expanded brine output"));
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_without_calls() {
        let gw = Arc::new(ScriptedGateway::new(|_| Reply::text("ok")));
        let exec = TaskExecutor::new(
            gw.clone(),
            Arc::new(NoSearch),
            Arc::new(InMemoryObservationalMemory::new()),
            RetryPolicy::none(),
            &ExecutorConfig::default(),
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        let r = exec.execute(&spec(4, 4000), VersionId::SEED, &cancel).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert!(gw.calls().is_empty());
    }
}
