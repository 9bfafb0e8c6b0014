//! In-memory fakes for storage traits
//!
//! Provides `MemoryPolicyLineage`, `MemoryBenchmarkLog`, and `MemoryAuditLog`
//! that satisfy the trait contracts without touching the filesystem. Used by
//! tests and by single-process deployments that do not need persistence.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::records::{
    AuditRecord, BenchmarkRun, PolicyParameters, PolicyVersion, VersionId, VersionOrigin,
};
use crate::storage_traits::*;
use crate::table::LineageTable;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryPolicyLineage
// ---------------------------------------------------------------------------

/// In-memory lineage table.
#[derive(Debug, Default)]
pub struct MemoryPolicyLineage {
    table: Mutex<LineageTable>,
}

impl MemoryPolicyLineage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyLineage for MemoryPolicyLineage {
    async fn create_version(
        &self,
        parent: Option<VersionId>,
        parameters: PolicyParameters,
        origin: VersionOrigin,
    ) -> StorageResult<PolicyVersion> {
        lock(&self.table).create(parent, parameters, origin)
    }

    async fn get(&self, id: VersionId) -> StorageResult<PolicyVersion> {
        lock(&self.table).get(id)
    }

    async fn list(&self) -> StorageResult<Vec<PolicyVersion>> {
        Ok(lock(&self.table).versions.clone())
    }

    async fn active(&self) -> StorageResult<Option<VersionId>> {
        Ok(lock(&self.table).active)
    }

    async fn set_active(&self, id: VersionId) -> StorageResult<()> {
        lock(&self.table).set_active(id)
    }
}

// ---------------------------------------------------------------------------
// MemoryBenchmarkLog
// ---------------------------------------------------------------------------

/// In-memory benchmark log backed by a `Vec`.
#[derive(Debug, Default)]
pub struct MemoryBenchmarkLog {
    runs: Mutex<Vec<BenchmarkRun>>,
}

impl MemoryBenchmarkLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BenchmarkLog for MemoryBenchmarkLog {
    async fn append(&self, run: BenchmarkRun) -> StorageResult<()> {
        lock(&self.runs).push(run);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<BenchmarkRun>> {
        Ok(lock(&self.runs).clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditLog
// ---------------------------------------------------------------------------

/// In-memory audit log backed by a `Vec`.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> StorageResult<()> {
        lock(&self.records).push(record);
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<AuditRecord>> {
        Ok(lock(&self.records).clone())
    }
}
