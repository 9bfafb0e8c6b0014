//! Process-wide counters.
//!
//! Incremented at the call site; [`Metrics::flush`] emits current values as
//! one `info!` event (the CLI calls it before exiting).

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    tasks_failed: AtomicU64,
    tokens_spent: AtomicU64,
    candidates_produced: AtomicU64,
    promotions: AtomicU64,
    rollbacks: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tokens_spent: AtomicU64::new(0),
            candidates_produced: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tokens(&self, n: u64) {
        self.tokens_spent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_candidates(&self) {
        self.candidates_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_promotions(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_completed = self.runs_completed(),
            runs_failed = self.runs_failed(),
            tasks_failed = self.tasks_failed(),
            tokens_spent = self.tokens_spent(),
            candidates_produced = self.candidates_produced(),
            promotions = self.promotions(),
            rollbacks = self.rollbacks(),
        );
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    pub fn tokens_spent(&self) -> u64 {
        self.tokens_spent.load(Ordering::Relaxed)
    }

    pub fn candidates_produced(&self) -> u64 {
        self.candidates_produced.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let m = Metrics::new();
        m.inc_runs_completed();
        m.inc_runs_completed();
        m.add_tokens(120);
        m.add_tokens(30);
        m.inc_rollbacks();
        assert_eq!(m.runs_completed(), 2);
        assert_eq!(m.tokens_spent(), 150);
        assert_eq!(m.rollbacks(), 1);
        assert_eq!(m.promotions(), 0);
    }
}
