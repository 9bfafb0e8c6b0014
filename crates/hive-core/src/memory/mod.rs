//! Observational memory: append-only records of what earlier runs learned.
//!
//! Executors consult it before generating ([`ObservationalMemory::lookup`]
//! plus [`context::assemble_context`]); the orchestrator appends task
//! outcomes and, for validated runs, reusable skill summaries.

pub mod context;
pub mod error;
pub mod index;

pub use context::{assemble_context, ContextBudget, ContextWindow};
pub use error::{MemoryError, MemoryResult};
pub use index::{
    InMemoryObservationalMemory, MemoryHit, MemoryKind, MemoryQuery, MemoryRecord,
    ObservationalMemory,
};
