//! Active policy pointer.
//!
//! Readers take an `Arc<PolicyVersion>` snapshot with [`PolicyStore::snapshot`]
//! and keep it for the whole run, so a concurrent promotion or rollback never
//! changes the version a run is executing under. Writers persist the pointer
//! through the lineage first, then swap the in-memory pointer in one store.

use std::sync::Arc;

use arc_swap::ArcSwap;
use hive_state::{
    AuditEvent, AuditLog, AuditRecord, PolicyLineage, PolicyParameters, PolicyVersion,
    StorageError, StorageResult, VersionId, VersionOrigin,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::obs;

/// Outcome of a pointer move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: VersionId,
    pub to: VersionId,
}

pub struct PolicyStore {
    active: ArcSwap<PolicyVersion>,
    lineage: Arc<dyn PolicyLineage>,
    audit: Arc<dyn AuditLog>,
    writer: Mutex<()>,
}

impl PolicyStore {
    /// Load the active version, installing a seed version with `seed`
    /// parameters when the lineage is empty.
    pub async fn open(
        lineage: Arc<dyn PolicyLineage>,
        audit: Arc<dyn AuditLog>,
        seed: PolicyParameters,
    ) -> StorageResult<Self> {
        let active = match lineage.active().await? {
            Some(id) => lineage.get(id).await?,
            None => {
                let version = match lineage.list().await?.into_iter().next() {
                    Some(first) => first,
                    None => {
                        let v = lineage
                            .create_version(None, seed, VersionOrigin::Seed)
                            .await?;
                        audit
                            .append(AuditRecord::now(AuditEvent::VersionCreated {
                                version: v.clone(),
                            }))
                            .await?;
                        v
                    }
                };
                lineage.set_active(version.version_id).await?;
                info!(version = %version.version_id, "installed initial active policy");
                version
            }
        };
        Ok(Self {
            active: ArcSwap::from_pointee(active),
            lineage,
            audit,
            writer: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<PolicyVersion> {
        self.active.load_full()
    }

    pub fn active_id(&self) -> VersionId {
        self.active.load().version_id
    }

    pub fn lineage(&self) -> &Arc<dyn PolicyLineage> {
        &self.lineage
    }

    pub async fn get(&self, id: VersionId) -> StorageResult<PolicyVersion> {
        self.lineage.get(id).await
    }

    /// Record a new inactive version derived from `parent`.
    pub async fn create_candidate(
        &self,
        parent: VersionId,
        parameters: PolicyParameters,
        origin: VersionOrigin,
    ) -> StorageResult<PolicyVersion> {
        let version = self
            .lineage
            .create_version(Some(parent), parameters, origin)
            .await?;
        self.audit
            .append(AuditRecord::now(AuditEvent::VersionCreated {
                version: version.clone(),
            }))
            .await?;
        Ok(version)
    }

    async fn swap(&self, to: VersionId) -> StorageResult<Transition> {
        let from = self.active_id();
        if to == from {
            return Err(StorageError::AlreadyActive(to));
        }
        let target = self.lineage.get(to).await?;
        self.lineage.set_active(to).await?;
        self.active.store(Arc::new(target));
        Ok(Transition { from, to })
    }

    pub async fn promote(&self, to: VersionId) -> StorageResult<Transition> {
        let _guard = self.writer.lock().await;
        let t = self.swap(to).await?;
        self.audit
            .append(AuditRecord::now(AuditEvent::VersionPromoted {
                from: t.from,
                to: t.to,
            }))
            .await?;
        obs::emit_policy_promoted(t.from, t.to);
        Ok(t)
    }

    pub async fn rollback(&self, to: VersionId, reason: &str) -> StorageResult<Transition> {
        let _guard = self.writer.lock().await;
        let t = self.swap(to).await?;
        self.audit
            .append(AuditRecord::now(AuditEvent::VersionRolledBack {
                from: t.from,
                to: t.to,
                reason: reason.to_string(),
            }))
            .await?;
        obs::emit_policy_rolled_back(t.from, t.to, reason);
        Ok(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_state::fakes::{MemoryAuditLog, MemoryPolicyLineage};

    async fn store() -> (PolicyStore, Arc<MemoryAuditLog>) {
        let audit = Arc::new(MemoryAuditLog::new());
        let store = PolicyStore::open(
            Arc::new(MemoryPolicyLineage::new()),
            audit.clone(),
            PolicyParameters::with_adapter("base"),
        )
        .await
        .unwrap();
        (store, audit)
    }

    #[tokio::test]
    async fn open_installs_seed() {
        let (store, audit) = store().await;
        assert_eq!(store.active_id(), VersionId::SEED);
        assert_eq!(store.snapshot().parameters.adapter.as_deref(), Some("base"));
        assert_eq!(audit.list().await.unwrap()[0].event.name(), "version_created");
    }

    #[tokio::test]
    async fn snapshots_survive_promotion() {
        let (store, _) = store().await;
        let held = store.snapshot();
        let cand = store
            .create_candidate(
                VersionId::SEED,
                PolicyParameters::default(),
                VersionOrigin::Seed,
            )
            .await
            .unwrap();
        assert_eq!(store.active_id(), VersionId::SEED);

        let t = store.promote(cand.version_id).await.unwrap();
        assert_eq!(t.from, VersionId::SEED);
        assert_eq!(store.active_id(), cand.version_id);
        assert_eq!(held.version_id, VersionId::SEED);
        assert_eq!(
            store.lineage().active().await.unwrap(),
            Some(cand.version_id)
        );
    }

    #[tokio::test]
    async fn moving_to_active_is_refused() {
        let (store, _) = store().await;
        assert!(matches!(
            store.rollback(VersionId::SEED, "test").await,
            Err(StorageError::AlreadyActive(_))
        ));
        assert!(store.promote(VersionId::SEED).await.is_err());
    }

    #[tokio::test]
    async fn unknown_target_leaves_pointer_alone() {
        let (store, _) = store().await;
        assert!(store.promote(VersionId(42)).await.is_err());
        assert_eq!(store.active_id(), VersionId::SEED);
    }

    #[tokio::test]
    async fn reopen_keeps_existing_active() {
        let lineage = Arc::new(MemoryPolicyLineage::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let first = PolicyStore::open(lineage.clone(), audit.clone(), PolicyParameters::default())
            .await
            .unwrap();
        let cand = first
            .create_candidate(VersionId::SEED, PolicyParameters::default(), VersionOrigin::Seed)
            .await
            .unwrap();
        first.promote(cand.version_id).await.unwrap();

        let second = PolicyStore::open(lineage, audit, PolicyParameters::default())
            .await
            .unwrap();
        assert_eq!(second.active_id(), cand.version_id);
    }
}
