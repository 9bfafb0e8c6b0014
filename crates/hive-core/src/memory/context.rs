//! Token-budgeted packing of memory hits into prompt context.

use super::index::MemoryHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_tokens: u64,
}

impl ContextBudget {
    pub fn new(max_tokens: u64) -> Self {
        Self { max_tokens }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub record_id: String,
    pub domain: String,
    pub text: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    pub items: Vec<ContextItem>,
    pub total_tokens: u64,
    pub dropped_count: usize,
}

impl ContextWindow {
    /// One bullet per item, or `None` when nothing was packed.
    pub fn render(&self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        Some(
            self.items
                .iter()
                .map(|i| format!("- [{}] {}", i.domain, i.text))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Greedily pack hits, most relevant first, until the budget is spent.
/// Hits that do not fit are skipped; smaller later hits may still fit.
pub fn assemble_context(hits: &[MemoryHit], budget: ContextBudget) -> ContextWindow {
    let mut sorted: Vec<&MemoryHit> = hits.iter().collect();
    sorted.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

    let mut items = Vec::new();
    let mut total_tokens = 0;
    let mut dropped_count = 0;

    for hit in sorted {
        let tokens = hit.record.token_estimate;
        if total_tokens + tokens <= budget.max_tokens {
            items.push(ContextItem {
                record_id: hit.record.id.clone(),
                domain: hit.record.domain.clone(),
                text: hit.record.summary.clone(),
                tokens,
            });
            total_tokens += tokens;
        } else {
            dropped_count += 1;
        }
    }

    ContextWindow {
        items,
        total_tokens,
        dropped_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::index::{MemoryKind, MemoryRecord};

    fn hit(summary: &str, relevance: f64) -> MemoryHit {
        MemoryHit {
            record: MemoryRecord::new(MemoryKind::TaskOutcome, "d", "k", summary, 1.0),
            relevance,
        }
    }

    #[test]
    fn empty_hits_render_nothing() {
        let w = assemble_context(&[], ContextBudget::new(100));
        assert!(w.items.is_empty());
        assert_eq!(w.render(), None);
    }

    #[test]
    fn most_relevant_first_within_budget() {
        let hits = vec![hit(&"a".repeat(400), 0.9), hit("short", 0.2), hit("tiny", 0.5)];
        // 400 bytes is 100 tokens, over the budget of 10.
        let w = assemble_context(&hits, ContextBudget::new(10));
        assert_eq!(w.dropped_count, 1);
        assert_eq!(w.items[0].text, "tiny");
        assert_eq!(w.items[1].text, "short");
        assert!(w.total_tokens <= 10);
        assert_eq!(w.render().unwrap().lines().count(), 2);
    }
}
