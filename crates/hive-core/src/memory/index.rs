//! Record types, the memory trait, and the in-process index.

use std::collections::{BTreeSet, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::{MemoryError, MemoryResult};
use crate::text::{estimate_tokens, keywords, overlap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Findings of one executed task.
    TaskOutcome,
    /// Summary of a run that passed validation.
    Skill,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskOutcome => write!(f, "task_outcome"),
            Self::Skill => write!(f, "skill"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub kind: MemoryKind,
    pub domain: String,
    /// Text the record is matched against (objective or query).
    pub key: String,
    pub summary: String,
    /// SHA-256 of `summary`, hex encoded.
    pub content_digest: String,
    /// 0.0–1.0; validation score or task status scaled.
    pub quality: f64,
    pub created_at: DateTime<Utc>,
    pub token_estimate: u64,
}

impl MemoryRecord {
    pub fn new(
        kind: MemoryKind,
        domain: impl Into<String>,
        key: impl Into<String>,
        summary: impl Into<String>,
        quality: f64,
    ) -> Self {
        let summary = summary.into();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            domain: domain.into(),
            key: key.into(),
            content_digest: hex::encode(Sha256::digest(summary.as_bytes())),
            token_estimate: estimate_tokens(&summary),
            summary,
            quality: quality.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub record: MemoryRecord,
    pub relevance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub text: String,
    /// Records from other domains still match, at half relevance.
    pub domain: Option<String>,
    pub kind: Option<MemoryKind>,
    pub limit: usize,
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            ..Self::default()
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn of_kind(mut self, kind: MemoryKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Append-only memory store.
#[async_trait]
pub trait ObservationalMemory: Send + Sync {
    /// Records ranked by relevance to the query, best first.
    async fn lookup(&self, query: &MemoryQuery) -> MemoryResult<Vec<MemoryHit>>;

    /// Append a record. Returns `false` when identical content of the same
    /// kind is already stored. Existing records are never modified.
    async fn append(&self, record: MemoryRecord) -> MemoryResult<bool>;
}

#[derive(Default)]
struct IndexState {
    records: Vec<MemoryRecord>,
    ids: HashSet<String>,
    digests: HashSet<(MemoryKind, String)>,
}

/// Process-local memory index.
#[derive(Default)]
pub struct InMemoryObservationalMemory {
    state: RwLock<IndexState>,
}

impl InMemoryObservationalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn relevance(query: &MemoryQuery, query_words: &BTreeSet<String>, record: &MemoryRecord) -> f64 {
    let record_words = keywords(&format!("{} {}", record.key, record.summary));
    let mut score = overlap(query_words, &record_words) * (0.5 + 0.5 * record.quality);
    if let Some(domain) = &query.domain {
        if domain != &record.domain {
            score *= 0.5;
        }
    }
    score
}

#[async_trait]
impl ObservationalMemory for InMemoryObservationalMemory {
    async fn lookup(&self, query: &MemoryQuery) -> MemoryResult<Vec<MemoryHit>> {
        let words = keywords(&query.text);
        let state = self.read();
        let mut hits: Vec<MemoryHit> = state
            .records
            .iter()
            .filter(|r| query.kind.map_or(true, |k| k == r.kind))
            .filter_map(|r| {
                let relevance = relevance(query, &words, r);
                (relevance > 0.0).then(|| MemoryHit {
                    record: r.clone(),
                    relevance,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn append(&self, record: MemoryRecord) -> MemoryResult<bool> {
        let mut state = self.write();
        if state.ids.contains(&record.id) {
            return Err(MemoryError::DuplicateId(record.id));
        }
        if !state
            .digests
            .insert((record.kind, record.content_digest.clone()))
        {
            return Ok(false);
        }
        state.ids.insert(record.id.clone());
        state.records.push(record);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(domain: &str, key: &str, summary: &str, quality: f64) -> MemoryRecord {
        MemoryRecord::new(MemoryKind::TaskOutcome, domain, key, summary, quality)
    }

    #[tokio::test]
    async fn lookup_ranks_by_overlap_and_quality() {
        let mem = InMemoryObservationalMemory::new();
        mem.append(outcome("energy", "lithium supply chain", "refining is concentrated", 0.4))
            .await
            .unwrap();
        mem.append(outcome("energy", "lithium supply chain", "new mines in Australia", 1.0))
            .await
            .unwrap();
        mem.append(outcome("energy", "wind turbines", "blade recycling", 1.0))
            .await
            .unwrap();

        let hits = mem
            .lookup(&MemoryQuery::new("lithium supply outlook", 10).in_domain("energy"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.summary, "new mines in Australia");
        assert!(hits[0].relevance > hits[1].relevance);
    }

    #[tokio::test]
    async fn other_domains_rank_lower() {
        let mem = InMemoryObservationalMemory::new();
        mem.append(outcome("finance", "cobalt prices", "prices fell", 1.0))
            .await
            .unwrap();
        mem.append(outcome("mining", "cobalt prices", "prices fell sharply", 1.0))
            .await
            .unwrap();
        let hits = mem
            .lookup(&MemoryQuery::new("cobalt prices", 5).in_domain("mining"))
            .await
            .unwrap();
        assert_eq!(hits[0].record.domain, "mining");
    }

    #[tokio::test]
    async fn identical_content_is_stored_once() {
        let mem = InMemoryObservationalMemory::new();
        assert!(mem.append(outcome("d", "k", "same text", 1.0)).await.unwrap());
        assert!(!mem.append(outcome("d", "k2", "same text", 0.5)).await.unwrap());
        assert_eq!(mem.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let mem = InMemoryObservationalMemory::new();
        let rec = outcome("d", "k", "first", 1.0);
        let mut clash = outcome("d", "k", "second", 1.0);
        clash.id = rec.id.clone();
        mem.append(rec).await.unwrap();
        assert!(matches!(
            mem.append(clash).await,
            Err(MemoryError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn kind_filter_and_limit_apply() {
        let mem = InMemoryObservationalMemory::new();
        for i in 0..4 {
            mem.append(outcome("d", "graphite anodes", &format!("note {i}"), 1.0))
                .await
                .unwrap();
        }
        mem.append(MemoryRecord::new(
            MemoryKind::Skill,
            "d",
            "graphite anodes",
            "skill",
            1.0,
        ))
        .await
        .unwrap();
        let hits = mem
            .lookup(&MemoryQuery::new("graphite", 2).of_kind(MemoryKind::TaskOutcome))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.record.kind == MemoryKind::TaskOutcome));
    }
}
