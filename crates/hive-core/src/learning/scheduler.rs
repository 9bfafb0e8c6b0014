//! Background consumer of completed runs.
//!
//! Each run is folded into the trainer window and the governor's live
//! score. A produced candidate is evaluated at once; otherwise the governor
//! evaluates on its own cadence. Errors are logged and never stop the loop.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::GovernorError;
use super::governor::{BenchmarkGovernor, GovernorOutcome};
use super::trainer::SelfDistillationTrainer;
use crate::cancel::CancelToken;
use crate::domain::CompletedRun;

/// Counters for one loop lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoopReport {
    pub runs_seen: usize,
    pub cycles: usize,
    pub candidates: usize,
    pub decisions: usize,
}

pub struct LearningLoop {
    trainer: SelfDistillationTrainer,
    governor: BenchmarkGovernor,
    report: LoopReport,
}

impl LearningLoop {
    pub fn new(trainer: SelfDistillationTrainer, governor: BenchmarkGovernor) -> Self {
        Self {
            trainer,
            governor,
            report: LoopReport::default(),
        }
    }

    pub fn trainer(&self) -> &SelfDistillationTrainer {
        &self.trainer
    }

    pub fn governor(&self) -> &BenchmarkGovernor {
        &self.governor
    }

    pub fn report(&self) -> &LoopReport {
        &self.report
    }

    /// Evaluate the active version (and any pending candidate) off cadence.
    pub async fn evaluate_now(&mut self) -> Result<GovernorOutcome, GovernorError> {
        let outcome = self.governor.evaluate().await?;
        self.report.decisions += 1;
        Ok(outcome)
    }

    /// Process one completed run. Returns the governor outcome when an
    /// evaluation took place.
    pub async fn handle(&mut self, run: CompletedRun) -> Option<GovernorOutcome> {
        self.report.runs_seen += 1;
        let evaluation_due = self.governor.observe(&run);
        let cycle_due = self.trainer.observe(run);

        let mut candidate = None;
        if cycle_due {
            self.report.cycles += 1;
            match self.trainer.run_cycle().await {
                Ok(version) => {
                    self.report.candidates += 1;
                    candidate = Some(version.version_id);
                }
                Err(e) if e.is_skip() => debug!(reason = %e, "training cycle skipped"),
                Err(e) => warn!(error = %e, "training cycle failed"),
            }
        }

        if let Some(id) = candidate {
            self.governor.submit_candidate(id);
        } else if !evaluation_due {
            return None;
        }

        match self.governor.evaluate().await {
            Ok(outcome) => {
                self.report.decisions += 1;
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "benchmark evaluation failed");
                None
            }
        }
    }

    /// Drain `rx` until it closes or `shutdown` fires.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<CompletedRun>,
        shutdown: CancelToken,
    ) -> LoopReport {
        info!("learning loop started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(run) => {
                        self.handle(run).await;
                    }
                    None => break,
                },
            }
        }
        info!(
            runs = self.report.runs_seen,
            cycles = self.report.cycles,
            candidates = self.report.candidates,
            decisions = self.report.decisions,
            "learning loop stopped"
        );
        self.report
    }

    pub fn spawn(
        self,
        rx: mpsc::Receiver<CompletedRun>,
        shutdown: CancelToken,
    ) -> JoinHandle<LoopReport> {
        tokio::spawn(self.run(rx, shutdown))
    }
}
