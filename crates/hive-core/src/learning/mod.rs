//! Continual learning: self-distillation and benchmark gating.
//!
//! Both consumers run off the request path inside [`LearningLoop`], fed by
//! completed runs over a bounded channel.

pub mod benchmark;
pub mod error;
pub mod governor;
pub mod scheduler;
pub mod trainer;

pub use benchmark::{BenchmarkCase, BenchmarkSuite, SuiteRunner, SuiteScore};
pub use error::{GovernorError, TrainingError};
pub use governor::{BenchmarkGovernor, GovernorOutcome, GovernorState};
pub use scheduler::{LearningLoop, LoopReport};
pub use trainer::{propose_update, SelfDistillationTrainer, TrainerState, TrainingExample, Update};
