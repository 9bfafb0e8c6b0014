//! Wiring: one configuration plus external collaborators in, a ready
//! orchestrator and its learning loop out.

use std::sync::Arc;

use hive_state::fakes::{MemoryAuditLog, MemoryBenchmarkLog, MemoryPolicyLineage};
use hive_state::{AuditLog, BenchmarkLog, PolicyLineage, PolicyParameters, StorageError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cancel::CancelToken;
use crate::config::{ConfigError, HiveConfig};
use crate::domain::CompletedRun;
use crate::gateway::{ModelGateway, NoSearch, SearchProvider};
use crate::learning::{
    BenchmarkGovernor, BenchmarkSuite, GovernorError, LearningLoop, LoopReport,
    SelfDistillationTrainer, SuiteRunner,
};
use crate::memory::{InMemoryObservationalMemory, ObservationalMemory};
use crate::orchestrator::Orchestrator;
use crate::policy::PolicyStore;
use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Suite(#[from] GovernorError),

    #[error("failed to open policy state: {0}")]
    Storage(#[from] StorageError),
}

/// Everything the engine consumes but does not own.
pub struct Collaborators {
    pub gateway: Arc<dyn ModelGateway>,
    pub search: Arc<dyn SearchProvider>,
    pub memory: Arc<dyn ObservationalMemory>,
    pub lineage: Arc<dyn PolicyLineage>,
    pub benchmarks: Arc<dyn BenchmarkLog>,
    pub audit: Arc<dyn AuditLog>,
}

impl Collaborators {
    /// Process-local state, no search.
    pub fn in_memory(gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            gateway,
            search: Arc::new(NoSearch),
            memory: Arc::new(InMemoryObservationalMemory::new()),
            lineage: Arc::new(MemoryPolicyLineage::new()),
            benchmarks: Arc::new(MemoryBenchmarkLog::new()),
            audit: Arc::new(MemoryAuditLog::new()),
        }
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = search;
        self
    }
}

pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub learning: LearningLoop,
    pub completed_runs: mpsc::Receiver<CompletedRun>,
    pub store: Arc<PolicyStore>,
}

impl Runtime {
    pub async fn assemble(
        config: &HiveConfig,
        parts: Collaborators,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let suite = match &config.governor.suite_path {
            Some(path) => BenchmarkSuite::load(path)?,
            None => BenchmarkSuite::builtin(),
        };

        let store = Arc::new(
            PolicyStore::open(
                parts.lineage.clone(),
                parts.audit.clone(),
                PolicyParameters::default(),
            )
            .await?,
        );
        let (tx, rx) = mpsc::channel(config.runtime.event_buffer);
        let orchestrator = Orchestrator::new(
            config,
            parts.gateway.clone(),
            parts.search,
            parts.memory,
            store.clone(),
            parts.audit.clone(),
        )
        .with_completed_runs(tx);

        let retry = RetryPolicy::from(&config.retry);
        let trainer = SelfDistillationTrainer::new(
            &config.trainer,
            suite.domains(),
            parts.gateway.clone(),
            retry.clone(),
            orchestrator.validation(),
            store.clone(),
            parts.audit.clone(),
        );
        let governor = BenchmarkGovernor::new(
            &config.governor,
            suite,
            SuiteRunner::new(parts.gateway, retry),
            store.clone(),
            parts.benchmarks,
            parts.audit,
        );
        info!(active = %store.active_id(), "runtime assembled");

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            learning: LearningLoop::new(trainer, governor),
            completed_runs: rx,
            store,
        })
    }

    /// Move the learning loop onto a background task.
    pub fn start(
        self,
        shutdown: CancelToken,
    ) -> (Arc<Orchestrator>, Arc<PolicyStore>, JoinHandle<LoopReport>) {
        let handle = self.learning.spawn(self.completed_runs, shutdown);
        (self.orchestrator, self.store, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fakes::EchoGateway;
    use hive_state::VersionId;

    #[tokio::test]
    async fn assembles_with_seed_policy() {
        let runtime = Runtime::assemble(
            &HiveConfig::default(),
            Collaborators::in_memory(Arc::new(EchoGateway)),
        )
        .await
        .unwrap();
        assert_eq!(runtime.store.active_id(), VersionId::SEED);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = HiveConfig::default();
        config.planner.max_tasks = 0;
        let err = Runtime::assemble(&config, Collaborators::in_memory(Arc::new(EchoGateway)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Config(_)));
    }
}
