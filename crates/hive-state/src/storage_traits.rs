//! Storage trait definitions for Hive
//!
//! These traits define the persisted-state abstractions:
//! - `PolicyLineage`: lineage table of policy versions plus the active pointer
//! - `BenchmarkLog`: append-only log of benchmark runs
//! - `AuditLog`: append-only audit surface consumed by external tooling
//!
//! All traits are async and backend-agnostic. In-memory fakes live in
//! [`crate::fakes`], filesystem backends in [`crate::fs`].

use async_trait::async_trait;

use crate::error::StorageError;
use crate::records::{
    AuditRecord, BenchmarkRun, PolicyParameters, PolicyVersion, VersionId, VersionOrigin,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// PolicyLineage
// ---------------------------------------------------------------------------

/// Policy lineage table.
///
/// Guarantees:
/// - `create_version` assigns strictly increasing ids and never touches
///   existing versions.
/// - `set_active` only changes the pointer; it fails for unknown ids.
/// - Versions are never deleted.
#[async_trait]
pub trait PolicyLineage: Send + Sync {
    /// Append a new version derived from `parent` (or a root when `None`).
    async fn create_version(
        &self,
        parent: Option<VersionId>,
        parameters: PolicyParameters,
        origin: VersionOrigin,
    ) -> StorageResult<PolicyVersion>;

    /// Fetch a version by id.
    async fn get(&self, id: VersionId) -> StorageResult<PolicyVersion>;

    /// All versions, oldest first.
    async fn list(&self) -> StorageResult<Vec<PolicyVersion>>;

    /// The id the active pointer currently references, if any.
    async fn active(&self) -> StorageResult<Option<VersionId>>;

    /// Move the active pointer.
    async fn set_active(&self, id: VersionId) -> StorageResult<()>;

    /// Walk parent links from `id` back to the root, `id` first.
    async fn ancestry(&self, id: VersionId) -> StorageResult<Vec<VersionId>> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if chain.contains(&current) {
                return Err(StorageError::Corrupt {
                    location: format!("lineage at {current}"),
                    reason: "parent cycle".to_string(),
                });
            }
            let version = self.get(current).await?;
            chain.push(current);
            cursor = version.parent;
        }
        Ok(chain)
    }
}

// ---------------------------------------------------------------------------
// BenchmarkLog
// ---------------------------------------------------------------------------

/// Append-only benchmark run log.
#[async_trait]
pub trait BenchmarkLog: Send + Sync {
    /// Append a run. Runs are never rewritten.
    async fn append(&self, run: BenchmarkRun) -> StorageResult<()>;

    /// All runs in append order.
    async fn list(&self) -> StorageResult<Vec<BenchmarkRun>>;

    /// Runs recorded for one version, in append order.
    async fn for_version(&self, id: VersionId) -> StorageResult<Vec<BenchmarkRun>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.policy_version_id == id)
            .collect())
    }

    /// Most recent run recorded for a version.
    async fn latest_for_version(&self, id: VersionId) -> StorageResult<Option<BenchmarkRun>> {
        Ok(self.for_version(id).await?.pop())
    }

    /// Whether any run for `id` passed the suite.
    async fn has_passing_run(&self, id: VersionId) -> StorageResult<bool> {
        Ok(self.for_version(id).await?.iter().any(|r| r.passed))
    }
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Append-only audit surface.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: AuditRecord) -> StorageResult<()>;

    /// All records in append order.
    async fn list(&self) -> StorageResult<Vec<AuditRecord>>;

    /// The last `n` records, oldest first.
    async fn tail(&self, n: usize) -> StorageResult<Vec<AuditRecord>> {
        let mut all = self.list().await?;
        let skip = all.len().saturating_sub(n);
        Ok(all.split_off(skip))
    }
}
