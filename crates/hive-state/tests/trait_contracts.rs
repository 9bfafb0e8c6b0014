//! Trait contract tests for PolicyLineage, BenchmarkLog, and AuditLog.
//!
//! Every backend runs the same assertions: the in-memory fakes and the
//! filesystem implementations must be indistinguishable to callers.

use std::collections::BTreeMap;

use chrono::Utc;
use hive_state::fakes::{MemoryAuditLog, MemoryBenchmarkLog, MemoryPolicyLineage};
use hive_state::storage_traits::*;
use hive_state::{
    AuditEvent, AuditRecord, BenchmarkDecision, BenchmarkRun, FsPolicyLineage, JsonlAuditLog,
    JsonlBenchmarkLog, PolicyParameters, StorageError, VersionId, VersionOrigin,
};

fn bench(version: u64, score: f64, passed: bool) -> BenchmarkRun {
    BenchmarkRun {
        run_id: uuid::Uuid::new_v4(),
        policy_version_id: VersionId(version),
        suite_id: "core".to_string(),
        aggregate_score: score,
        case_scores: BTreeMap::new(),
        case_deltas: BTreeMap::new(),
        passed,
        decision: BenchmarkDecision::Hold,
        live_score: None,
        created_at: Utc::now(),
    }
}

// ===========================================================================
// PolicyLineage contract
// ===========================================================================

async fn lineage_assigns_monotonic_ids(lineage: &dyn PolicyLineage) {
    let a = lineage
        .create_version(None, PolicyParameters::default(), VersionOrigin::Seed)
        .await
        .unwrap();
    let b = lineage
        .create_version(
            Some(a.version_id),
            PolicyParameters::default(),
            VersionOrigin::Seed,
        )
        .await
        .unwrap();
    assert_eq!(a.version_id, VersionId::SEED);
    assert!(b.version_id > a.version_id);
    assert_eq!(b.parent, Some(a.version_id));
}

async fn lineage_rejects_unknown_parent(lineage: &dyn PolicyLineage) {
    let err = lineage
        .create_version(
            Some(VersionId(42)),
            PolicyParameters::default(),
            VersionOrigin::Seed,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::UnknownParent { .. }));
}

async fn lineage_pointer_swap_keeps_versions(lineage: &dyn PolicyLineage) {
    let a = lineage
        .create_version(None, PolicyParameters::with_adapter("a"), VersionOrigin::Seed)
        .await
        .unwrap();
    let b = lineage
        .create_version(
            Some(a.version_id),
            PolicyParameters::with_adapter("b"),
            VersionOrigin::Seed,
        )
        .await
        .unwrap();
    lineage.set_active(a.version_id).await.unwrap();
    lineage.set_active(b.version_id).await.unwrap();
    lineage.set_active(a.version_id).await.unwrap();

    assert_eq!(lineage.active().await.unwrap(), Some(a.version_id));
    assert_eq!(lineage.get(b.version_id).await.unwrap(), b);
    assert_eq!(
        lineage.ancestry(b.version_id).await.unwrap(),
        vec![b.version_id, a.version_id]
    );
}

async fn lineage_set_active_unknown_fails(lineage: &dyn PolicyLineage) {
    let err = lineage.set_active(VersionId(99)).await.unwrap_err();
    assert!(matches!(err, StorageError::VersionNotFound(VersionId(99))));
}

#[tokio::test]
async fn memory_lineage_contract() {
    lineage_assigns_monotonic_ids(&MemoryPolicyLineage::new()).await;
    lineage_rejects_unknown_parent(&MemoryPolicyLineage::new()).await;
    lineage_pointer_swap_keeps_versions(&MemoryPolicyLineage::new()).await;
    lineage_set_active_unknown_fails(&MemoryPolicyLineage::new()).await;
}

#[tokio::test]
async fn fs_lineage_contract() {
    for check in 0..4 {
        let dir = tempfile::tempdir().unwrap();
        let lineage = FsPolicyLineage::open(dir.path()).unwrap();
        match check {
            0 => lineage_assigns_monotonic_ids(&lineage).await,
            1 => lineage_rejects_unknown_parent(&lineage).await,
            2 => lineage_pointer_swap_keeps_versions(&lineage).await,
            _ => lineage_set_active_unknown_fails(&lineage).await,
        }
    }
}

// ===========================================================================
// BenchmarkLog contract
// ===========================================================================

async fn benchmark_log_is_append_only(log: &dyn BenchmarkLog) {
    log.append(bench(1, 0.7, true)).await.unwrap();
    log.append(bench(2, 0.4, false)).await.unwrap();
    log.append(bench(1, 0.8, true)).await.unwrap();

    let all = log.list().await.unwrap();
    assert_eq!(all.len(), 3);

    let latest = log.latest_for_version(VersionId(1)).await.unwrap().unwrap();
    assert_eq!(latest.aggregate_score, 0.8);
    assert!(log.has_passing_run(VersionId(1)).await.unwrap());
    assert!(!log.has_passing_run(VersionId(2)).await.unwrap());
    assert!(!log.has_passing_run(VersionId(3)).await.unwrap());
}

#[tokio::test]
async fn memory_benchmark_log_contract() {
    benchmark_log_is_append_only(&MemoryBenchmarkLog::new()).await;
}

#[tokio::test]
async fn jsonl_benchmark_log_contract() {
    let dir = tempfile::tempdir().unwrap();
    benchmark_log_is_append_only(&JsonlBenchmarkLog::in_dir(dir.path()).unwrap()).await;
}

// ===========================================================================
// AuditLog contract
// ===========================================================================

async fn audit_tail_returns_last_records_in_order(log: &dyn AuditLog) {
    for i in 1..=5u64 {
        log.append(AuditRecord::now(AuditEvent::VersionPromoted {
            from: VersionId(i),
            to: VersionId(i + 1),
        }))
        .await
        .unwrap();
    }
    let tail = log.tail(2).await.unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(
        tail[1].event,
        AuditEvent::VersionPromoted {
            from: VersionId(5),
            to: VersionId(6),
        }
    );
    assert_eq!(log.tail(50).await.unwrap().len(), 5);
}

#[tokio::test]
async fn memory_audit_log_contract() {
    audit_tail_returns_last_records_in_order(&MemoryAuditLog::new()).await;
}

#[tokio::test]
async fn jsonl_audit_log_contract() {
    let dir = tempfile::tempdir().unwrap();
    audit_tail_returns_last_records_in_order(&JsonlAuditLog::in_dir(dir.path()).unwrap()).await;
}
