//! Hosting many runs
//!
//! Each run lives behind its own async mutex, so calls for one run are serialized
//! while unrelated runs proceed in parallel. Reads go to the checkpoint store and
//! never wait on a run's lock.

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::error::{ErrorChainExt, ErrorContext, PlanflowError, Result, StorageError};
use crate::workflow::{
    store_from_config, ApprovalOutcome, CheckpointStore, Plan, RunId, RunState, RunSummary,
    StepOutcome, WorkflowEngine,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

struct RunSlot {
    engine: Mutex<WorkflowEngine>,
    cancel: CancellationToken,
}

impl RunSlot {
    fn new(engine: WorkflowEngine) -> Arc<Self> {
        let cancel = CancellationToken::new();
        Arc::new(Self {
            engine: Mutex::new(engine.with_cancellation_token(cancel.clone())),
            cancel,
        })
    }

    /// Cancel the run and wait until no call holds it
    ///
    /// The returned guard leaves the engine terminal, so nothing queued behind it
    /// can write another checkpoint.
    async fn shut_down(&self) -> Result<MutexGuard<'_, WorkflowEngine>> {
        self.cancel.cancel();
        let mut engine = self.engine.lock().await;
        engine.cancel().await?;
        Ok(engine)
    }
}

/// Registry of independent runs sharing one checkpoint store
pub struct RunRegistry {
    runs: DashMap<RunId, Arc<RunSlot>>,
    collaborators: Collaborators,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
}

impl RunRegistry {
    /// Create a registry
    pub fn new(
        collaborators: Collaborators,
        store: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            runs: DashMap::new(),
            collaborators,
            store,
            config,
        }
    }

    /// Create a registry whose store is chosen by `config.checkpoint_dir`
    pub fn from_config(collaborators: Collaborators, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = store_from_config(&config).with_context(|| match &config.checkpoint_dir {
            Some(dir) => format!("Failed to open checkpoint store at {}", dir.display()),
            None => "Failed to open checkpoint store".to_string(),
        })?;
        Ok(Self::new(collaborators, store, config))
    }

    /// Engine configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a run with the registry's collaborators
    pub async fn create_run(&self) -> Result<RunId> {
        self.create_run_with(self.collaborators.clone()).await
    }

    /// Start a run with its own collaborators, e.g. a narrower tool registry
    ///
    /// A run restored from the store after a restart uses the registry's
    /// collaborators again.
    pub async fn create_run_with(&self, collaborators: Collaborators) -> Result<RunId> {
        let run_id = RunId::new();
        let engine =
            WorkflowEngine::new(run_id, None, collaborators, self.store.clone(), &self.config)
                .await?;
        self.runs.insert(run_id, RunSlot::new(engine));
        Ok(run_id)
    }

    /// Generate a plan for the run and stop for approval
    pub async fn create_plan(&self, run_id: &RunId, task: &str) -> Result<Plan> {
        let slot = self.slot(run_id).await?;
        let mut engine = slot.engine.lock().await;
        Ok(engine.create_plan(task).await?)
    }

    /// Approve and run to completion, or reject and replan
    pub async fn approve_and_execute(
        &self,
        run_id: &RunId,
        approved: bool,
        modifications: Option<String>,
    ) -> Result<ApprovalOutcome> {
        let slot = self.slot(run_id).await?;
        let mut engine = slot.engine.lock().await;
        Ok(engine.approve_and_execute(approved, modifications).await?)
    }

    /// Record approval without running a step
    pub async fn approve(&self, run_id: &RunId) -> Result<()> {
        let slot = self.slot(run_id).await?;
        let mut engine = slot.engine.lock().await;
        Ok(engine.approve().await?)
    }

    /// Run exactly one step, or synthesize once all steps ran
    pub async fn execute_next_step(&self, run_id: &RunId) -> Result<StepOutcome> {
        let slot = self.slot(run_id).await?;
        let mut engine = slot.engine.lock().await;
        Ok(engine.execute_next_step().await?)
    }

    /// Latest checkpointed state of the run
    pub async fn get_state(&self, run_id: &RunId) -> Result<RunState> {
        self.store
            .load(run_id)
            .await
            .map(|checkpoint| checkpoint.state)
            .map_err(run_not_found)
    }

    /// Progress counts from the latest checkpoint
    pub async fn summary(&self, run_id: &RunId) -> Result<RunSummary> {
        Ok(self.get_state(run_id).await?.summary())
    }

    /// Cancel the run
    ///
    /// An idle run fails immediately. A busy run fails at its next checkpoint,
    /// after the step in flight finishes, or as soon as the busy call returns.
    /// Cancelling a finished run does nothing.
    pub async fn cancel(&self, run_id: &RunId) -> Result<()> {
        let slot = self.slot(run_id).await?;
        slot.cancel.cancel();

        match slot.engine.try_lock() {
            Ok(mut engine) => engine.cancel().await?,
            Err(_) => {
                tracing::info!(
                    run_id = %run_id,
                    "Run is busy; cancellation takes effect at the next checkpoint"
                );
                let run_id = *run_id;
                let slot = slot.clone();
                tokio::spawn(async move {
                    let mut engine = slot.engine.lock().await;
                    if let Err(e) = engine.cancel().await {
                        tracing::warn!(
                            run_id = %run_id,
                            "Deferred cancellation failed: {}",
                            e.error_chain()
                        );
                    }
                });
            }
        }
        Ok(())
    }

    /// Cancel the run, wait for any call in flight, and delete its checkpoint
    pub async fn remove_run(&self, run_id: &RunId) -> Result<()> {
        let slot = self.runs.get(run_id).map(|entry| entry.value().clone());
        let _stopped = match &slot {
            Some(slot) => Some(slot.shut_down().await?),
            None => None,
        };
        self.runs.remove(run_id);

        self.store.remove(run_id).await.map_err(run_not_found)?;
        tracing::info!(run_id = %run_id, "Removed run");
        Ok(())
    }

    /// Latest state of every stored run, oldest first
    pub async fn list_runs(&self) -> Result<Vec<RunState>> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .map(|checkpoint| checkpoint.state)
            .collect())
    }

    /// Remove runs whose last checkpoint is older than `days` days
    ///
    /// A run with a call in flight is cancelled and removed once that call returns.
    pub async fn cleanup_old_runs(&self, days: u32) -> Result<u32> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
        let mut removed = 0;

        for checkpoint in self.store.list().await? {
            if checkpoint.saved_at >= cutoff {
                continue;
            }
            let run_id = checkpoint.run_id;
            let slot = self.runs.get(&run_id).map(|entry| entry.value().clone());
            let _stopped = match &slot {
                Some(slot) => Some(slot.shut_down().await?),
                None => None,
            };
            self.runs.remove(&run_id);

            match self.store.remove(&run_id).await {
                Ok(()) | Err(StorageError::NotFound { .. }) => removed += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            tracing::info!("Cleaned up {} runs older than {} days", removed, days);
        }
        Ok(removed)
    }

    /// Remove runs older than the configured retention period
    pub async fn cleanup_expired_runs(&self) -> Result<u32> {
        self.cleanup_old_runs(self.config.run_retention_days).await
    }

    /// Number of runs currently held in memory
    pub fn loaded_runs(&self) -> usize {
        self.runs.len()
    }

    async fn slot(&self, run_id: &RunId) -> Result<Arc<RunSlot>> {
        if let Some(slot) = self.runs.get(run_id) {
            return Ok(slot.value().clone());
        }

        let checkpoint = self.store.load(run_id).await.map_err(run_not_found)?;
        let engine = WorkflowEngine::restore(
            checkpoint,
            self.collaborators.clone(),
            self.store.clone(),
            &self.config,
        );
        let slot = self
            .runs
            .entry(*run_id)
            .or_insert_with(|| RunSlot::new(engine))
            .value()
            .clone();
        Ok(slot)
    }
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("loaded_runs", &self.runs.len())
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn run_not_found(error: StorageError) -> PlanflowError {
    match error {
        StorageError::NotFound { run_id } => PlanflowError::RunNotFound(run_id.to_string()),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{research_collaborators, StaticPlanner};
    use crate::workflow::{MemoryCheckpointStore, RunStatus, CANCELLED_BY_USER};
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry() -> RunRegistry {
        RunRegistry::new(
            research_collaborators(StaticPlanner::research(2)),
            Arc::new(MemoryCheckpointStore::new()),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_create_run_is_checkpointed_immediately() {
        let registry = registry();
        let run_id = registry.create_run().await.unwrap();
        let state = registry.get_state(&run_id).await.unwrap();
        assert_eq!(state.status, RunStatus::Pending);
        assert_eq!(registry.loaded_runs(), 1);
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let registry = registry();
        let missing = RunId::new();
        assert!(matches!(
            registry.get_state(&missing).await,
            Err(PlanflowError::RunNotFound(_))
        ));
        assert!(matches!(
            registry.create_plan(&missing, "anything").await,
            Err(PlanflowError::RunNotFound(_))
        ));
        assert!(matches!(
            registry.remove_run(&missing).await,
            Err(PlanflowError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_run() {
        let registry = registry();
        let run_id = registry.create_run().await.unwrap();
        registry.remove_run(&run_id).await.unwrap();
        assert_eq!(registry.loaded_runs(), 0);
        assert!(registry.get_state(&run_id).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_runs() {
        let registry = registry();
        registry.create_run().await.unwrap();
        assert_eq!(registry.cleanup_expired_runs().await.unwrap(), 0);
        assert_eq!(registry.list_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_busy_applies_once_the_call_returns() {
        let registry = registry();
        let run_id = registry.create_run().await.unwrap();
        registry.create_plan(&run_id, "find targets").await.unwrap();

        let slot = registry.slot(&run_id).await.unwrap();
        let busy = slot.engine.lock().await;
        registry.cancel(&run_id).await.unwrap();
        assert_eq!(
            registry.get_state(&run_id).await.unwrap().status,
            RunStatus::AwaitingApproval
        );
        drop(busy);

        let state = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = registry.get_state(&run_id).await.unwrap();
                if state.status.is_terminal() {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("cancellation must not be lost when the run was busy");
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some(CANCELLED_BY_USER));
    }

    #[tokio::test]
    async fn test_remove_idle_run_blocks_queued_calls() {
        let registry = registry();
        let run_id = registry.create_run().await.unwrap();
        registry.create_plan(&run_id, "find targets").await.unwrap();

        let slot = registry.slot(&run_id).await.unwrap();
        registry.remove_run(&run_id).await.unwrap();

        // a caller that resolved the slot before removal finds a finished run
        let mut engine = slot.engine.lock().await;
        assert!(engine.state().is_terminal());
        assert!(engine.approve_and_execute(true, None).await.is_err());
        drop(engine);
        assert!(registry.list_runs().await.unwrap().is_empty());
    }

    #[test]
    fn test_from_config_reports_unusable_checkpoint_dir() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, "occupied").unwrap();

        let config = EngineConfig {
            checkpoint_dir: Some(file.clone()),
            ..EngineConfig::default()
        };
        let collaborators = research_collaborators(StaticPlanner::research(1));
        let err = RunRegistry::from_config(collaborators, config).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("Failed to open checkpoint store"));
        assert!(message.contains("not-a-dir"));
        let chain = err.error_chain().to_string();
        assert!(chain.contains("Invalid storage path"));
    }
}
