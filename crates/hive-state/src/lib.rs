//! Hive-State: persisted state for the Hive orchestration engine
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only records and a single swappable pointer. Nothing in this
//! crate performs a destructive update: versions, benchmark runs and audit
//! records are only ever appended, and the active policy pointer is the one
//! value that is replaced.
//!
//! ## Key Components
//!
//! - `PolicyLineage`: lineage table of `PolicyVersion`s + active pointer
//! - `BenchmarkLog`: append-only `BenchmarkRun` log
//! - `AuditLog`: append-only `AuditRecord` log for external inspection

mod error;
pub mod fakes;
pub mod fs;
pub mod records;
pub mod storage_traits;
mod table;

pub use error::StorageError;
pub use fs::{FsPolicyLineage, JsonlAuditLog, JsonlBenchmarkLog, JsonlLog};
pub use records::{
    AuditEvent, AuditRecord, BenchmarkDecision, BenchmarkRun, PolicyParameters, PolicyVersion,
    VersionId, VersionOrigin,
};
pub use storage_traits::{AuditLog, BenchmarkLog, PolicyLineage, StorageResult};
