//! # Planflow
//!
//! A plan-approve-execute workflow engine for tool-backed research tasks.
//!
//! ## Features
//!
//! - **Planning**: a task is broken into atomic steps, each bound to one tool
//! - **Approval**: execution waits for an explicit human decision on every plan
//! - **Replanning**: a rejected plan is replaced by a fresh one built from feedback
//! - **Checkpointing**: every transition is persisted so runs survive restarts
//! - **Partial failure**: a failed step is recorded and the run carries on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use planflow::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(collaborators: Collaborators) -> planflow::Result<()> {
//! let registry = RunRegistry::new(
//!     collaborators,
//!     Arc::new(MemoryCheckpointStore::new()),
//!     EngineConfig::default(),
//! );
//!
//! let run = registry.create_run().await?;
//! let plan = registry.create_plan(&run, "find targets for disease X").await?;
//! println!("{} steps planned", plan.len());
//!
//! let outcome = registry.approve_and_execute(&run, true, None).await?;
//! println!("{}", outcome.answer().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Shared utilities
pub mod common;

/// Engine configuration
pub mod config;

/// Error types and utilities
pub mod error;

/// Tool trait and registry
pub mod tools;

/// Planner, reasoner and synthesizer contracts
pub mod collaborators;

/// Runs, plans, checkpoints and the engine
pub mod workflow;

/// Test doubles shared by unit and integration tests
#[doc(hidden)]
pub mod test_utils;

pub use collaborators::{
    AgentAction, CollaboratorError, Collaborators, Observation, PlanGenerator, ReasoningRequest,
    ResponseSynthesizer, StepReasoner,
};
pub use config::{ConfigError, EngineConfig};
pub use error::{ErrorContext, PlanflowError, Result, StorageError};
pub use tools::{Tool, ToolError, ToolRegistry, ToolSchema};
pub use workflow::{
    ApprovalOutcome, Checkpoint, CheckpointStore, EngineError, FileSystemCheckpointStore,
    MemoryCheckpointStore, Plan, PlanDraft, PlanId, RunId, RunRegistry, RunState, RunStatus,
    Step, StepOutcome, StepResult, WorkflowEngine,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::{
        AgentAction, CollaboratorError, Collaborators, PlanGenerator, ReasoningRequest,
        ResponseSynthesizer, StepReasoner,
    };
    pub use crate::config::EngineConfig;
    pub use crate::error::{ErrorContext, PlanflowError, Result};
    pub use crate::tools::{Tool, ToolError, ToolRegistry, ToolSchema};
    pub use crate::workflow::{
        ApprovalOutcome, CheckpointStore, EngineError, FileSystemCheckpointStore,
        MemoryCheckpointStore, Plan, PlanDraft, RunId, RunRegistry, RunState, RunStatus, Step,
        StepOutcome, StepResult,
    };
}
