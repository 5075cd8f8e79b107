//! Core workflow engine implementation

use super::{
    ApprovalOutcome, EngineError, EngineResult, ExecutionEvent, ExecutionEventType, StepOutcome,
};
use crate::collaborators::{CollaboratorError, Collaborators};
use crate::config::EngineConfig;
use crate::workflow::step_executor::panic_message;
use crate::workflow::{
    build_context, Checkpoint, CheckpointStore, Plan, RunEvent, RunId, RunState, RunStatus,
    RunSummary, StepExecutor,
};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Checkpointed state machine for a single run
///
/// Every applied event is followed by a checkpoint write, and every checkpoint
/// write is a point where a pending cancellation takes effect. The engine itself
/// is single-writer: callers that share it must serialize access.
pub struct WorkflowEngine {
    state: RunState,
    sequence: u64,
    collaborators: Collaborators,
    executor: StepExecutor,
    store: Arc<dyn CheckpointStore>,
    cancel_token: CancellationToken,
    /// Execution history for debugging
    pub(super) execution_history: Vec<ExecutionEvent>,
    /// Maximum size of execution history to prevent unbounded growth
    pub(super) max_history_size: usize,
}

impl WorkflowEngine {
    /// Start a new run and write its first checkpoint
    pub async fn new(
        run_id: RunId,
        task: Option<String>,
        collaborators: Collaborators,
        store: Arc<dyn CheckpointStore>,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let mut state = RunState::new(run_id);
        if let Some(task) = task {
            state.task = task;
        }

        let mut engine = Self::assemble(state, 0, collaborators, store, config);
        engine.checkpoint().await?;
        tracing::info!(run_id = %run_id, "Created run");
        Ok(engine)
    }

    /// Resume a run from its latest checkpoint
    pub fn restore(
        checkpoint: Checkpoint,
        collaborators: Collaborators,
        store: Arc<dyn CheckpointStore>,
        config: &EngineConfig,
    ) -> Self {
        tracing::info!(
            run_id = %checkpoint.run_id,
            "Restored run at sequence {} with status {}",
            checkpoint.sequence,
            checkpoint.state.status
        );
        Self::assemble(
            checkpoint.state,
            checkpoint.sequence,
            collaborators,
            store,
            config,
        )
    }

    fn assemble(
        state: RunState,
        sequence: u64,
        collaborators: Collaborators,
        store: Arc<dyn CheckpointStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            state,
            sequence,
            executor: StepExecutor::from_collaborators(&collaborators, config),
            collaborators,
            store,
            cancel_token: CancellationToken::new(),
            execution_history: Vec::new(),
            max_history_size: config.max_history_size,
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Token that cancels this run when tripped
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Run identifier
    pub fn id(&self) -> RunId {
        self.state.id
    }

    /// Borrow the current state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Owned snapshot of the current state
    pub fn get_state(&self) -> RunState {
        self.state.clone()
    }

    /// Sequence number of the last checkpoint written
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Progress counts
    pub fn summary(&self) -> RunSummary {
        self.state.summary()
    }

    /// Generate a plan for `task` and stop for approval
    ///
    /// No step runs here; execution starts only from a later approval.
    pub async fn create_plan(&mut self, task: &str) -> EngineResult<Plan> {
        self.ensure_active()?;
        self.commit(RunEvent::PlanningStarted {
            task: Some(task.to_string()),
        })
        .await?;
        self.log_event(
            ExecutionEventType::PlanningStarted,
            format!("Planning task: {}", task),
        );
        self.plan_current_task().await
    }

    /// Approve to run every remaining step, or reject to get a new plan
    ///
    /// Modifications only matter on rejection; they are ignored when approving.
    pub async fn approve_and_execute(
        &mut self,
        approved: bool,
        modifications: Option<String>,
    ) -> EngineResult<ApprovalOutcome> {
        self.ensure_active()?;

        if !approved {
            return self.replan(modifications).await.map(ApprovalOutcome::Replanned);
        }

        if let Some(modifications) = modifications {
            tracing::debug!(
                run_id = %self.state.id,
                "Ignoring modifications on approval: {}",
                modifications
            );
        }

        self.approve().await?;
        loop {
            match self.execute_next_step().await? {
                StepOutcome::Continued(_) => continue,
                StepOutcome::Finished(answer) => return Ok(ApprovalOutcome::Completed { answer }),
            }
        }
    }

    /// Record approval of the current plan without running anything
    pub async fn approve(&mut self) -> EngineResult<()> {
        match self.state.status {
            RunStatus::AwaitingApproval => {
                self.commit(RunEvent::Approved).await?;
                self.log_event(
                    ExecutionEventType::Approved,
                    format!("Approved plan with {} steps", self.state.total_steps()),
                );
                Ok(())
            }
            RunStatus::Executing => Ok(()),
            RunStatus::Pending | RunStatus::Planning => Err(EngineError::NoPlan),
            status => Err(EngineError::RunTerminal { status }),
        }
    }

    /// Run the next step, or synthesize the answer once every step has a result
    pub async fn execute_next_step(&mut self) -> EngineResult<StepOutcome> {
        match self.state.status {
            RunStatus::Executing => {}
            RunStatus::AwaitingApproval => return Err(EngineError::ApprovalRequired),
            RunStatus::Pending | RunStatus::Planning => return Err(EngineError::NoPlan),
            status => return Err(EngineError::RunTerminal { status }),
        }
        self.observe_cancellation().await?;

        let step = match self.state.next_step() {
            Some(step) => step.clone(),
            None => return self.finish().await.map(StepOutcome::Finished),
        };

        let index = self.state.current_step_index;
        let context = build_context(&self.state.past_steps);
        tracing::debug!(
            run_id = %self.state.id,
            step_index = index,
            "Executing step: {}",
            step.description
        );

        let result = self.executor.execute(&step, &context).await;
        let details = match &result.error {
            None => format!("Step {} succeeded: {}", index + 1, step.description),
            Some(error) => format!("Step {} failed: {} ({})", index + 1, step.description, error),
        };

        self.commit(RunEvent::StepRecorded(result.clone())).await?;
        self.log_event(ExecutionEventType::StepExecuted, details);
        Ok(StepOutcome::Continued(result))
    }

    /// Cancel the run now; a no-op once the run is terminal
    pub async fn cancel(&mut self) -> EngineResult<()> {
        self.cancel_token.cancel();
        if self.state.is_terminal() {
            return Ok(());
        }
        self.apply_cancellation().await
    }

    async fn replan(&mut self, modifications: Option<String>) -> EngineResult<Plan> {
        let previous = self.state.plan.as_ref().map(|plan| plan.id);
        self.commit(RunEvent::Rejected {
            modifications: modifications.clone(),
        })
        .await?;
        self.log_event(
            ExecutionEventType::Rejected,
            match (previous, modifications) {
                (Some(id), Some(m)) => format!("Rejected plan {}: {}", id, m),
                (Some(id), None) => format!("Rejected plan {}", id),
                (None, _) => "Rejected plan".to_string(),
            },
        );
        self.plan_current_task().await
    }

    async fn plan_current_task(&mut self) -> EngineResult<Plan> {
        let task = self.state.effective_task();
        let schemas = self.collaborators.tools.schemas();

        let drafted = guarded(self.collaborators.planner.generate_plan(&task, &schemas)).await;
        let accepted = drafted.and_then(|draft| {
            Plan::from_draft(draft, &self.collaborators.tools)
                .map_err(|e| format!("Generated plan is invalid: {}", e))
        });

        match accepted {
            Ok(plan) => {
                self.commit(RunEvent::PlanCreated(plan.clone())).await?;
                self.log_event(
                    ExecutionEventType::PlanCreated,
                    format!("Plan {} created with {} steps", plan.id, plan.len()),
                );
                Ok(plan)
            }
            Err(reason) => {
                self.commit(RunEvent::PlanningFailed(reason.clone())).await?;
                self.log_event(
                    ExecutionEventType::Failed,
                    format!("Planning failed: {}", reason),
                );
                Err(EngineError::Planning { reason })
            }
        }
    }

    async fn finish(&mut self) -> EngineResult<String> {
        let task = self.state.effective_task();
        let synthesized = guarded(
            self.collaborators
                .synthesizer
                .synthesize(&task, &self.state.past_steps),
        )
        .await;

        match synthesized {
            Ok(answer) => {
                self.commit(RunEvent::Synthesized(answer.clone())).await?;
                let summary = self.state.summary();
                self.log_event(
                    ExecutionEventType::Completed,
                    format!(
                        "Completed with {} of {} steps succeeded",
                        summary.succeeded, summary.total_steps
                    ),
                );
                Ok(answer)
            }
            Err(reason) => {
                self.commit(RunEvent::SynthesisFailed(reason.clone())).await?;
                self.log_event(
                    ExecutionEventType::Failed,
                    format!("Synthesis failed: {}", reason),
                );
                Err(EngineError::Execution { reason })
            }
        }
    }

    fn ensure_active(&self) -> EngineResult<()> {
        if self.state.is_terminal() {
            return Err(EngineError::RunTerminal {
                status: self.state.status,
            });
        }
        Ok(())
    }

    /// Apply `event`, checkpoint, then honour any pending cancellation
    async fn commit(&mut self, event: RunEvent) -> EngineResult<()> {
        self.state.apply(event)?;
        self.checkpoint().await?;
        self.observe_cancellation().await
    }

    async fn observe_cancellation(&mut self) -> EngineResult<()> {
        if self.cancel_token.is_cancelled() && !self.state.is_terminal() {
            self.apply_cancellation().await?;
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    async fn apply_cancellation(&mut self) -> EngineResult<()> {
        self.state.apply(RunEvent::Cancelled)?;
        self.checkpoint().await?;
        self.log_event(
            ExecutionEventType::Failed,
            format!(
                "Cancelled after {} of {} steps",
                self.state.past_steps.len(),
                self.state.total_steps()
            ),
        );
        Ok(())
    }

    async fn checkpoint(&mut self) -> EngineResult<()> {
        let checkpoint = Checkpoint::new(self.sequence + 1, self.state.clone());
        self.store.save(&checkpoint).await?;
        self.sequence = checkpoint.sequence;
        tracing::trace!(
            run_id = %self.state.id,
            "Checkpoint {} written ({})",
            self.sequence,
            self.state.status
        );
        Ok(())
    }

    /// Log an execution event
    pub fn log_event(&mut self, event_type: ExecutionEventType, details: String) {
        tracing::info!(run_id = %self.state.id, "{}: {}", event_type, &details);
        let event = ExecutionEvent {
            timestamp: chrono::Utc::now(),
            event_type,
            details,
        };
        self.execution_history.push(event);

        if self.execution_history.len() > self.max_history_size {
            let trim_count = self.execution_history.len() - self.max_history_size;
            self.execution_history.drain(0..trim_count);
        }
    }

    /// Get the execution history
    pub fn get_history(&self) -> &[ExecutionEvent] {
        &self.execution_history
    }

    /// Set the maximum history size
    pub fn set_max_history_size(&mut self, max_size: usize) {
        self.max_history_size = max_size;
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("run_id", &self.state.id)
            .field("status", &self.state.status)
            .field("sequence", &self.sequence)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Await a collaborator call, turning errors and panics into a failure message
async fn guarded<T, F>(call: F) -> Result<T, String>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!(
            "Collaborator panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}
