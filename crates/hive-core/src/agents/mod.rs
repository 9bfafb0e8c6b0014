//! Agent roles and their shared capability.
//!
//! Every agent is a variant of [`Agent`] and is driven through
//! [`Agent::execute`] with a typed [`AgentInput`]. Dispatch is by role;
//! feeding an agent an input for another role is an error, never a panic.

pub mod executor;
pub mod observer;
pub mod planner;
pub mod reviewer;

use hive_state::VersionId;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::domain::{Query, SynthesizedContext, TaskResult, TaskSpec, ValidationVerdict};

pub use executor::TaskExecutor;
pub use observer::Observer;
pub use planner::{Plan, Planner};
pub use reviewer::Reviewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Executor,
    Observer,
    Reviewer,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRole::Planner => "planner",
            AgentRole::Executor => "executor",
            AgentRole::Observer => "observer",
            AgentRole::Reviewer => "reviewer",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("decomposition failed: {0}")]
    Decomposition(String),

    #[error("{role} agent cannot handle {input} input")]
    RoleMismatch { role: AgentRole, input: &'static str },

    #[error("expected {expected} output, got output from {got}")]
    UnexpectedOutput {
        expected: AgentRole,
        got: AgentRole,
    },
}

/// Work handed to an agent.
#[derive(Debug, Clone)]
pub enum AgentInput {
    Plan {
        query: Query,
        policy: VersionId,
    },
    Execute {
        spec: TaskSpec,
        policy: VersionId,
        cancel: CancelToken,
    },
    Synthesize {
        query: Query,
        results: Vec<TaskResult>,
    },
    Revise {
        context: SynthesizedContext,
        notes: Vec<String>,
        policy: VersionId,
    },
    Review {
        context: SynthesizedContext,
        policy: VersionId,
    },
}

impl AgentInput {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentInput::Plan { .. } => "plan",
            AgentInput::Execute { .. } => "execute",
            AgentInput::Synthesize { .. } => "synthesize",
            AgentInput::Revise { .. } => "revise",
            AgentInput::Review { .. } => "review",
        }
    }
}

/// Typed output of a completed agent step.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Plan(Plan),
    Task(TaskResult),
    Context(SynthesizedContext),
    Verdict(ValidationVerdict),
}

impl AgentOutput {
    pub fn producing_role(&self) -> AgentRole {
        match self {
            AgentOutput::Plan(_) => AgentRole::Planner,
            AgentOutput::Task(_) => AgentRole::Executor,
            AgentOutput::Context(_) => AgentRole::Observer,
            AgentOutput::Verdict(_) => AgentRole::Reviewer,
        }
    }

    fn mismatch(&self, expected: AgentRole) -> AgentError {
        AgentError::UnexpectedOutput {
            expected,
            got: self.producing_role(),
        }
    }

    pub fn into_plan(self) -> Result<Plan, AgentError> {
        match self {
            AgentOutput::Plan(p) => Ok(p),
            other => Err(other.mismatch(AgentRole::Planner)),
        }
    }

    pub fn into_task_result(self) -> Result<TaskResult, AgentError> {
        match self {
            AgentOutput::Task(r) => Ok(r),
            other => Err(other.mismatch(AgentRole::Executor)),
        }
    }

    pub fn into_context(self) -> Result<SynthesizedContext, AgentError> {
        match self {
            AgentOutput::Context(c) => Ok(c),
            other => Err(other.mismatch(AgentRole::Observer)),
        }
    }

    pub fn into_verdict(self) -> Result<ValidationVerdict, AgentError> {
        match self {
            AgentOutput::Verdict(v) => Ok(v),
            other => Err(other.mismatch(AgentRole::Reviewer)),
        }
    }
}

pub enum Agent {
    Planner(Planner),
    Executor(TaskExecutor),
    Observer(Observer),
    Reviewer(Reviewer),
}

impl Agent {
    pub fn role(&self) -> AgentRole {
        match self {
            Agent::Planner(_) => AgentRole::Planner,
            Agent::Executor(_) => AgentRole::Executor,
            Agent::Observer(_) => AgentRole::Observer,
            Agent::Reviewer(_) => AgentRole::Reviewer,
        }
    }

    pub async fn execute(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        match (self, input) {
            (Agent::Planner(p), AgentInput::Plan { query, policy }) => {
                p.plan(&query, policy).await.map(AgentOutput::Plan)
            }
            (
                Agent::Executor(e),
                AgentInput::Execute {
                    spec,
                    policy,
                    cancel,
                },
            ) => Ok(AgentOutput::Task(e.execute(&spec, policy, &cancel).await)),
            (Agent::Observer(o), AgentInput::Synthesize { query, results }) => {
                Ok(AgentOutput::Context(o.synthesize(&query, &results)))
            }
            (
                Agent::Observer(o),
                AgentInput::Revise {
                    context,
                    notes,
                    policy,
                },
            ) => Ok(AgentOutput::Context(
                o.revise(&context, &notes, policy).await,
            )),
            (Agent::Reviewer(r), AgentInput::Review { context, policy }) => {
                Ok(AgentOutput::Verdict(r.review(&context, policy).await))
            }
            (agent, input) => Err(AgentError::RoleMismatch {
                role: agent.role(),
                input: input.kind(),
            }),
        }
    }
}
