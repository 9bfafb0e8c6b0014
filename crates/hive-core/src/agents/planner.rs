//! Query decomposition.
//!
//! The planner asks the model for independent sub-objectives, one per line,
//! then checks the answer: at least one objective, no more than
//! `max_tasks`, and no objective referring to another task. Any violation
//! (or a gateway failure) degrades the plan to a single task covering the
//! whole query; the reason travels with the plan so the report can say so.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use hive_state::VersionId;
use regex::Regex;
use tracing::{debug, warn};

use super::AgentError;
use crate::config::{ExecutorConfig, PlannerConfig};
use crate::domain::{Query, TaskSpec};
use crate::gateway::{GenerationConstraints, ModelGateway, Purpose, MATERIAL_SEPARATOR};
use crate::retry::RetryPolicy;

const PLAN_MAX_TOKENS: u32 = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub tasks: Vec<TaskSpec>,
    /// Why the plan fell back to a single task, if it did.
    pub degraded: Option<String>,
}

pub struct Planner {
    gateway: Arc<dyn ModelGateway>,
    retry: RetryPolicy,
    config: PlannerConfig,
    max_steps: u32,
    max_tokens_budget: u64,
}

fn list_prefix() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•]|\(?\d{1,2}[.):]|\d{1,2}\s+-)\s*").ok())
        .as_ref()
}

fn task_reference() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:task|step|sub-?objective|item)[-_\s]*(?:#|no\.?)?[-_\s]*(\d{1,2})\b")
            .ok()
    })
    .as_ref()
}

/// Id assigned to the objective at `idx`.
pub fn task_id(idx: usize) -> String {
    format!("task-{}", idx + 1)
}

/// Whether `text` mentions `id` as a whole token (`task-1` but not `task-10`).
fn mentions_id(text: &str, id: &str) -> bool {
    text.match_indices(id).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + id.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric())
            && !after.is_some_and(|c| c.is_alphanumeric())
    })
}

/// Split a model answer into objectives: one per non-empty line, list
/// markers stripped, duplicates (case-insensitive) dropped.
pub fn parse_objectives(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(|line| match list_prefix() {
            Some(re) => re.replace(line, "").trim().to_string(),
            None => line.trim().to_string(),
        })
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_lowercase()))
        .collect()
}

/// Reject objective lists where one objective needs another's output.
pub fn check_independence(objectives: &[String], markers: &[String]) -> Result<(), String> {
    for (idx, objective) in objectives.iter().enumerate() {
        let lower = objective.to_lowercase();
        if let Some(marker) = markers.iter().find(|m| lower.contains(&m.to_lowercase())) {
            return Err(format!(
                "objective {} depends on other work ('{marker}')",
                idx + 1
            ));
        }
        if let Some(other) = (0..objectives.len())
            .filter(|&o| o != idx)
            .find(|&o| mentions_id(&lower, &task_id(o)))
        {
            return Err(format!(
                "objective {} references {}",
                idx + 1,
                task_id(other)
            ));
        }
        if let Some(re) = task_reference() {
            for cap in re.captures_iter(objective) {
                let referenced: usize = cap[1].parse().unwrap_or(0);
                if referenced != idx + 1 && (1..=objectives.len()).contains(&referenced) {
                    return Err(format!(
                        "objective {} references objective {referenced}",
                        idx + 1
                    ));
                }
            }
        }
    }
    Ok(())
}

impl Planner {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        retry: RetryPolicy,
        planner: &PlannerConfig,
        executor: &ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            retry,
            config: planner.clone(),
            max_steps: executor.max_steps,
            max_tokens_budget: executor.max_tokens_budget,
        }
    }

    fn prompt(&self, query: &Query) -> String {
        format!(
            "Split the research question below into at most {} independent sub-objectives \
             for the '{}' domain. Each sub-objective must be answerable on its own, without \
             the result of any other. Reply with one sub-objective per line and nothing else.\
             {MATERIAL_SEPARATOR}{}",
            self.config.max_tasks, query.domain, query.text
        )
    }

    fn spec(&self, query: &Query, idx: usize, objective: String) -> TaskSpec {
        let mut inputs = BTreeMap::new();
        inputs.insert("domain".to_string(), query.domain.clone());
        inputs.insert("query".to_string(), query.text.clone());
        TaskSpec {
            task_id: task_id(idx),
            success_criteria: format!("Findings directly address: {objective}"),
            objective,
            inputs,
            max_steps: self.max_steps,
            max_tokens_budget: self.max_tokens_budget,
        }
    }

    fn degraded(&self, query: &Query, reason: String) -> Plan {
        warn!(reason = %reason, "plan degraded to a single task");
        Plan {
            tasks: vec![self.spec(query, 0, query.text.trim().to_string())],
            degraded: Some(reason),
        }
    }

    /// Decompose `query`. Only an empty query is an error; every other
    /// problem yields a degraded single-task plan.
    pub async fn plan(&self, query: &Query, policy: VersionId) -> Result<Plan, AgentError> {
        if query.text.trim().is_empty() {
            return Err(AgentError::Decomposition("query text is empty".into()));
        }

        let prompt = self.prompt(query);
        let constraints = GenerationConstraints::new(Purpose::Plan, PLAN_MAX_TOKENS);
        let generation = match self
            .retry
            .run("plan", || self.gateway.generate(policy, &prompt, &constraints))
            .await
        {
            Ok(g) => g,
            Err(e) => return Ok(self.degraded(query, format!("planner gateway error: {e}"))),
        };

        let objectives = parse_objectives(&generation.text);
        if objectives.is_empty() {
            return Ok(self.degraded(query, "planner returned no sub-objectives".into()));
        }
        if objectives.len() > self.config.max_tasks {
            return Ok(self.degraded(
                query,
                format!(
                    "planner returned {} sub-objectives, limit is {}",
                    objectives.len(),
                    self.config.max_tasks
                ),
            ));
        }
        if let Err(reason) = check_independence(&objectives, &self.config.dependency_markers) {
            return Ok(self.degraded(query, reason));
        }

        debug!(tasks = objectives.len(), "plan accepted");
        Ok(Plan {
            tasks: objectives
                .into_iter()
                .enumerate()
                .map(|(idx, objective)| self.spec(query, idx, objective))
                .collect(),
            degraded: None,
        })
    }
}
