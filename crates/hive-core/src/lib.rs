//! Hive Core Library
//!
//! Adaptive multi-agent research orchestration:
//! - a per-query pipeline (plan, parallel task execution, synthesis,
//!   validation) driven by [`Orchestrator`]
//! - continual self-distillation of the generation policy
//! - benchmark-gated promotion and rollback of the active policy version
//!
//! The learning side runs in [`LearningLoop`], fed by completed runs, and
//! touches the query path only through the active pointer in [`PolicyStore`].

pub mod agents;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod learning;
pub mod memory;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod policy;
pub mod retry;
pub mod runtime;
pub mod telemetry;
pub mod text;
pub mod validation;

pub use agents::{Agent, AgentError, AgentInput, AgentOutput, AgentRole, Plan};
pub use cancel::CancelToken;
pub use config::{ConfigError, HiveConfig};
pub use domain::{
    CompletedRun, Coverage, Query, Result, RunError, RunReport, SynthesizedContext, TaskResult,
    TaskSpec, TaskStatus, ValidationSummary, ValidationVerdict,
};
pub use gateway::http::HttpModelGateway;
pub use gateway::{
    GatewayError, Generation, GenerationConstraints, ModelGateway, Purpose, SearchFilters,
    SearchHit, SearchProvider,
};
pub use learning::{
    BenchmarkGovernor, BenchmarkSuite, GovernorOutcome, LearningLoop, LoopReport,
    SelfDistillationTrainer, TrainingError,
};
pub use memory::{InMemoryObservationalMemory, MemoryRecord, ObservationalMemory};
pub use metrics::METRICS;
pub use obs::RunSpan;
pub use orchestrator::Orchestrator;
pub use policy::{PolicyStore, Transition};
pub use retry::RetryPolicy;
pub use runtime::{Collaborators, Runtime, RuntimeError};
pub use telemetry::init_tracing;
pub use validation::{AggregationRule, ValidationTree};

/// Hive version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
