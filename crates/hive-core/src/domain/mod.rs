//! Domain models for Hive.
//!
//! - `Query`: a research request entering the system
//! - `TaskSpec` / `TaskResult`: one unit of fan-out work and its outcome
//! - `SynthesizedContext`: the Observer's merged, bounded view of a run
//! - `ValidationVerdict` / `ValidationSummary`: per-dimension and aggregate review
//! - `CompletedRun` / `RunReport`: what a finished run hands to learning and to the caller

pub mod error;
pub mod query;
pub mod run;
pub mod synthesis;
pub mod task;
pub mod validation;

pub use error::{Result, RunError};
pub use query::Query;
pub use run::{CompletedRun, RunReport, TaskSummary};
pub use synthesis::{Coverage, SynthesizedContext};
pub use task::{Findings, TaskResult, TaskSpec, TaskStatus};
pub use validation::{ValidationSummary, ValidationVerdict};
