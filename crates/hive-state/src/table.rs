//! Lineage table shared by the in-memory and filesystem backends.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::records::{PolicyParameters, PolicyVersion, VersionId, VersionOrigin};
use crate::storage_traits::StorageResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LineageTable {
    pub versions: Vec<PolicyVersion>,
    pub active: Option<VersionId>,
}

impl LineageTable {
    pub fn create(
        &mut self,
        parent: Option<VersionId>,
        parameters: PolicyParameters,
        origin: VersionOrigin,
    ) -> StorageResult<PolicyVersion> {
        if let Some(parent) = parent {
            if self.find(parent).is_none() {
                return Err(StorageError::UnknownParent { parent });
            }
        }
        let version_id = self
            .versions
            .last()
            .map(|v| v.version_id.next())
            .unwrap_or(VersionId::SEED);
        let version = PolicyVersion {
            version_id,
            parent,
            parameters,
            origin,
            created_at: Utc::now(),
        };
        self.versions.push(version.clone());
        Ok(version)
    }

    pub fn find(&self, id: VersionId) -> Option<&PolicyVersion> {
        // ids are dense and ascending, but a linear scan keeps this robust to
        // documents written by older tooling
        self.versions.iter().find(|v| v.version_id == id)
    }

    pub fn get(&self, id: VersionId) -> StorageResult<PolicyVersion> {
        self.find(id)
            .cloned()
            .ok_or(StorageError::VersionNotFound(id))
    }

    pub fn set_active(&mut self, id: VersionId) -> StorageResult<()> {
        if self.find(id).is_none() {
            return Err(StorageError::VersionNotFound(id));
        }
        self.active = Some(id);
        Ok(())
    }

    /// Reject documents whose ids are not strictly increasing.
    pub fn check(&self, location: &str) -> StorageResult<()> {
        for pair in self.versions.windows(2) {
            if pair[1].version_id <= pair[0].version_id {
                return Err(StorageError::Corrupt {
                    location: location.to_string(),
                    reason: format!(
                        "version ids not monotonic: {} then {}",
                        pair[0].version_id, pair[1].version_id
                    ),
                });
            }
        }
        if let Some(active) = self.active {
            if self.find(active).is_none() {
                return Err(StorageError::Corrupt {
                    location: location.to_string(),
                    reason: format!("active pointer references missing {active}"),
                });
            }
        }
        Ok(())
    }
}
