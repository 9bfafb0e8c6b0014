//! Per-query pipeline: plan, fan out, join, synthesize, validate.
//!
//! Every stage is driven through [`Agent::execute`]. The policy version is
//! snapshotted once at submission; a promotion or rollback that lands
//! mid-run does not affect it. Cancellation and the run deadline are
//! observed at the fan-out barrier and around validation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use hive_state::{AuditEvent, AuditLog, AuditRecord, VersionId};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::agents::{Agent, AgentError, AgentInput, Observer, Planner, TaskExecutor};
use crate::cancel::CancelToken;
use crate::config::HiveConfig;
use crate::domain::{
    CompletedRun, Query, Result, RunError, RunReport, SynthesizedContext, TaskResult, TaskSpec,
    TaskStatus, TaskSummary, ValidationSummary,
};
use crate::gateway::{ModelGateway, SearchProvider};
use crate::memory::{MemoryKind, MemoryRecord, ObservationalMemory};
use crate::metrics::METRICS;
use crate::obs;
use crate::policy::PolicyStore;
use crate::retry::RetryPolicy;
use crate::text::clip;
use crate::validation::ValidationTree;

const DEADLINE_EXCEEDED: &str = "run deadline exceeded";
const SKILL_SUMMARY_BYTES: usize = 600;

/// How the fan-out barrier was left.
struct FanIn {
    results: Vec<TaskResult>,
    timed_out: bool,
}

pub struct Orchestrator {
    planner: Agent,
    executor: Arc<Agent>,
    observer: Agent,
    validation: Arc<ValidationTree>,
    memory: Arc<dyn ObservationalMemory>,
    store: Arc<PolicyStore>,
    audit: Arc<dyn AuditLog>,
    completed: Option<mpsc::Sender<CompletedRun>>,
    worker_pool: usize,
    run_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        config: &HiveConfig,
        gateway: Arc<dyn ModelGateway>,
        search: Arc<dyn SearchProvider>,
        memory: Arc<dyn ObservationalMemory>,
        store: Arc<PolicyStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let planner = Planner::new(
            gateway.clone(),
            retry.clone(),
            &config.planner,
            &config.executor,
        );
        let executor = TaskExecutor::new(
            gateway.clone(),
            search,
            memory.clone(),
            retry.clone(),
            &config.executor,
        );
        let observer = Observer::new(gateway.clone(), retry.clone(), &config.observer);
        let validation = ValidationTree::new(gateway, retry, &config.validation);
        Self {
            planner: Agent::Planner(planner),
            executor: Arc::new(Agent::Executor(executor)),
            observer: Agent::Observer(observer),
            validation: Arc::new(validation),
            memory,
            store,
            audit,
            completed: None,
            worker_pool: config.executor.worker_pool,
            run_timeout: config.runtime.run_timeout(),
        }
    }

    /// Publish every finalized run on `tx` for the learning loop.
    pub fn with_completed_runs(mut self, tx: mpsc::Sender<CompletedRun>) -> Self {
        self.completed = Some(tx);
        self
    }

    /// The reviewer tree, shared with the trainer for student scoring.
    pub fn validation(&self) -> Arc<ValidationTree> {
        Arc::clone(&self.validation)
    }

    pub fn policy_store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub async fn submit(&self, query: Query) -> Result<RunReport> {
        self.submit_with_cancel(query, CancelToken::new()).await
    }

    /// Run `query` to completion unless `cancel` fires before the report
    /// is finalized.
    pub async fn submit_with_cancel(
        &self,
        query: Query,
        cancel: CancelToken,
    ) -> Result<RunReport> {
        let run_id = query.id.to_string();
        let outcome = self
            .run(query, cancel)
            .instrument(obs::run_span(&run_id))
            .await;
        if let Err(e) = &outcome {
            METRICS.inc_runs_failed();
            obs::emit_run_failed(&run_id, e);
        }
        outcome
    }

    async fn run(&self, query: Query, cancel: CancelToken) -> Result<RunReport> {
        query.validate()?;
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.run_timeout;
        let policy = self.store.snapshot();
        let version = policy.version_id;
        let run_id = query.id.to_string();
        obs::emit_run_started(&run_id, &query.domain, version);

        let mut warnings = Vec::new();
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                return Err(RunError::RunFailed {
                    reason: format!("{DEADLINE_EXCEEDED} while planning"),
                    diagnostics: Vec::new(),
                });
            }
            out = self.planner.execute(AgentInput::Plan { query: query.clone(), policy: version }) => {
                match out.and_then(|o| o.into_plan()) {
                    Ok(plan) => plan,
                    Err(AgentError::Decomposition(reason)) => {
                        return Err(RunError::Decomposition(reason))
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };
        if let Some(reason) = &plan.degraded {
            obs::emit_plan_degraded(&run_id, reason);
            warnings.push(format!("plan degraded to a single task: {reason}"));
        }

        let fan_in = self
            .execute_tasks(&plan.tasks, version, &cancel, deadline)
            .await?;
        if fan_in.timed_out {
            warnings.push(format!("{DEADLINE_EXCEEDED}, synthesized from terminal tasks"));
        }
        let results = fan_in.results;
        self.record_outcomes(&query, &plan.tasks, &results).await;

        let token_cost: u64 = results.iter().map(|r| r.token_cost).sum();
        METRICS.add_tokens(token_cost);
        let failed = results
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
            .count();
        for _ in 0..failed {
            METRICS.inc_tasks_failed();
        }
        if failed == results.len() {
            let reason = if fan_in.timed_out {
                format!("{DEADLINE_EXCEEDED} with no usable task results")
            } else {
                "every task failed".to_string()
            };
            return Err(RunError::RunFailed {
                reason,
                diagnostics: diagnostics(&results),
            });
        }

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let context = self
            .observer
            .execute(AgentInput::Synthesize {
                query: query.clone(),
                results: results.clone(),
            })
            .await?
            .into_context()?;

        let (context, summary) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            finalized = self.validation.finalize(context, &self.observer, version) => finalized?,
        };

        let target_met = summary.passed
            && query
                .quality_target
                .map_or(true, |target| summary.overall_score >= target);
        let execution_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if summary.passed {
            self.record_skill(&query, &context, &summary).await;
        }
        self.publish(&query, &context, &summary, version, token_cost, execution_ms)
            .await;

        METRICS.inc_runs_completed();
        obs::emit_run_finished(
            &run_id,
            execution_ms,
            context.coverage,
            token_cost,
            summary.passed,
        );

        let tasks = plan
            .tasks
            .iter()
            .zip(&results)
            .map(|(spec, r)| TaskSummary {
                task_id: r.task_id.clone(),
                objective: spec.objective.clone(),
                status: r.status,
                token_cost: r.token_cost,
                error: r.error.clone(),
            })
            .collect();

        Ok(RunReport {
            run_id: query.id,
            policy_version: version,
            report: context.text,
            coverage: context.coverage,
            confidence: context.confidence,
            validation: summary,
            target_met,
            tasks,
            citations: citations(&results),
            token_cost,
            execution_ms,
            warnings,
        })
    }

    /// Fan out every task and wait at the barrier until all are terminal,
    /// the caller cancels, or the deadline passes. Results come back in
    /// plan order; tasks still running at the deadline are `failed`.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    async fn execute_tasks(
        &self,
        tasks: &[TaskSpec],
        policy: VersionId,
        cancel: &CancelToken,
        deadline: tokio::time::Instant,
    ) -> Result<FanIn> {
        let permits = Arc::new(Semaphore::new(self.worker_pool.max(1)));
        let mut workers = JoinSet::new();
        for spec in tasks.iter().cloned() {
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            workers.spawn(
                async move {
                    let task_id = spec.task_id.clone();
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return TaskResult::failed(task_id, "worker pool closed");
                    };
                    let out = executor
                        .execute(AgentInput::Execute {
                            spec,
                            policy,
                            cancel,
                        })
                        .await;
                    match out.and_then(|o| o.into_task_result()) {
                        Ok(result) => result,
                        Err(e) => TaskResult::failed(task_id, e.to_string()),
                    }
                }
                .in_current_span(),
            );
        }

        let mut done: BTreeMap<String, TaskResult> = BTreeMap::new();
        let mut timed_out = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    workers.abort_all();
                    return Err(RunError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(terminal = done.len(), total = tasks.len(), "{DEADLINE_EXCEEDED}");
                    workers.abort_all();
                    timed_out = true;
                    break;
                }
                joined = workers.join_next() => match joined {
                    Some(Ok(result)) => {
                        debug!(task_id = %result.task_id, status = %result.status, "task terminal");
                        done.insert(result.task_id.clone(), result);
                    }
                    Some(Err(e)) => warn!(error = %e, "task worker did not complete"),
                    None => break,
                },
            }
        }

        let results = tasks
            .iter()
            .map(|spec| {
                done.remove(&spec.task_id).unwrap_or_else(|| {
                    let reason = if timed_out {
                        DEADLINE_EXCEEDED
                    } else {
                        "task worker aborted"
                    };
                    TaskResult::failed(spec.task_id.clone(), reason)
                })
            })
            .collect();
        Ok(FanIn { results, timed_out })
    }

    async fn record_outcomes(&self, query: &Query, tasks: &[TaskSpec], results: &[TaskResult]) {
        for (spec, result) in tasks.iter().zip(results) {
            if !result.is_usable() {
                continue;
            }
            let quality = match result.status {
                TaskStatus::Ok => 1.0,
                _ => 0.5,
            };
            let mut summary = result.findings.summary.clone();
            for point in &result.findings.key_points {
                summary.push_str("\n- ");
                summary.push_str(point);
            }
            let record = MemoryRecord::new(
                MemoryKind::TaskOutcome,
                &query.domain,
                &spec.objective,
                summary,
                quality,
            );
            if let Err(e) = self.memory.append(record).await {
                warn!(task_id = %result.task_id, error = %e, "memory append failed");
            }
        }
    }

    async fn record_skill(
        &self,
        query: &Query,
        context: &SynthesizedContext,
        summary: &ValidationSummary,
    ) {
        let record = MemoryRecord::new(
            MemoryKind::Skill,
            &query.domain,
            &query.text,
            clip(&context.text, SKILL_SUMMARY_BYTES),
            summary.overall_score / 100.0,
        );
        if let Err(e) = self.memory.append(record).await {
            warn!(error = %e, "skill append failed");
        }
    }

    /// Audit the run and hand it to the learning loop without waiting.
    async fn publish(
        &self,
        query: &Query,
        context: &SynthesizedContext,
        summary: &ValidationSummary,
        version: VersionId,
        token_cost: u64,
        execution_ms: u64,
    ) {
        let metrics = AuditRecord::now(AuditEvent::RunMetrics {
            run_id: query.id,
            version,
            validation_score: summary.overall_score,
            token_usage: token_cost,
            execution_ms,
            passed: summary.passed,
        });
        if let Err(e) = self.audit.append(metrics).await {
            warn!(error = %e, "run metrics not audited");
        }

        let Some(tx) = &self.completed else {
            return;
        };
        let run = CompletedRun {
            run_id: query.id,
            query: query.clone(),
            report: context.text.clone(),
            validation_score: summary.overall_score,
            passed: summary.passed,
            policy_version: version,
            token_cost,
            execution_ms,
            completed_at: Utc::now(),
        };
        match tx.try_send(run) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("learning channel full, dropping run record")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                info!("learning loop stopped, run record not forwarded")
            }
        }
    }
}

fn diagnostics(results: &[TaskResult]) -> Vec<String> {
    results
        .iter()
        .map(|r| {
            let reason = r.error.as_deref().unwrap_or("no findings");
            format!("{}: {} ({reason})", r.task_id, r.status)
        })
        .collect()
}

/// Citations of usable results, first occurrence wins.
fn citations(results: &[TaskResult]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    results
        .iter()
        .filter(|r| r.is_usable())
        .flat_map(|r| r.citations.iter())
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Findings;

    fn result(id: &str, status: TaskStatus, citations: &[&str]) -> TaskResult {
        TaskResult {
            task_id: id.into(),
            status,
            findings: Findings {
                summary: format!("{id} summary"),
                key_points: Vec::new(),
            },
            citations: citations.iter().map(|c| c.to_string()).collect(),
            token_cost: 10,
            steps: 1,
            error: None,
        }
    }

    #[test]
    fn citations_skip_failed_tasks_and_duplicates() {
        let results = vec![
            result("task-1", TaskStatus::Ok, &["a", "b"]),
            TaskResult::failed("task-2", "timeout"),
            result("task-3", TaskStatus::Partial, &["b", "c"]),
        ];
        assert_eq!(citations(&results), vec!["a", "b", "c"]);
    }

    #[test]
    fn diagnostics_name_every_task() {
        let results = vec![
            TaskResult::failed("task-1", "rate limited"),
            TaskResult::failed("task-2", DEADLINE_EXCEEDED),
        ];
        let d = diagnostics(&results);
        assert_eq!(d[0], "task-1: failed (rate limited)");
        assert!(d[1].contains(DEADLINE_EXCEEDED));
    }
}
