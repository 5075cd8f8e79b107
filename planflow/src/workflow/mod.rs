//! Plan-approve-execute workflow
//!
//! This module provides the run data model, the pure transition function, the
//! checkpointed engine that drives one run, and the registry that hosts many.

mod checkpoint;
mod engine;
mod plan;
mod registry;
mod run;
mod step_executor;
mod transition;

pub use checkpoint::{
    store_from_config, Checkpoint, CheckpointStore, FileSystemCheckpointStore,
    MemoryCheckpointStore,
};
pub use engine::{
    ApprovalOutcome, EngineError, EngineResult, ExecutionEvent, ExecutionEventType, StepOutcome,
    WorkflowEngine,
};
pub use plan::{Plan, PlanDraft, PlanError, PlanId, Step};
pub use registry::RunRegistry;
pub use run::{RunId, RunState, RunStatus, RunSummary, StepResult, CANCELLED_BY_USER};
pub use step_executor::{build_context, StepExecutor};
pub use transition::{RunEvent, TransitionError};
