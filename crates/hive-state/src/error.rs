//! Error types for hive-state

use thiserror::Error;

use crate::records::VersionId;

/// Errors produced by the persisted-state layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Policy version is not present in the lineage table
    #[error("policy version not found: {0}")]
    VersionNotFound(VersionId),

    /// A parent reference points at a version that was never created
    #[error("parent version {parent} does not exist")]
    UnknownParent { parent: VersionId },

    /// Pointer move targets the version that is already active
    #[error("policy version {0} is already active")]
    AlreadyActive(VersionId),

    /// No version has been marked active yet
    #[error("no active policy version")]
    NoActiveVersion,

    /// Underlying file could not be read or written
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted document violates an invariant (e.g. non-monotonic ids)
    #[error("corrupt state at {location}: {reason}")]
    Corrupt { location: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_not_found_mentions_version() {
        let err = StorageError::VersionNotFound(VersionId(7));
        assert_eq!(err.to_string(), "policy version not found: v7");
    }

    #[test]
    fn corrupt_includes_location() {
        let err = StorageError::Corrupt {
            location: "audit.jsonl:3".to_string(),
            reason: "truncated line".to_string(),
        };
        assert!(err.to_string().contains("audit.jsonl:3"));
    }
}
