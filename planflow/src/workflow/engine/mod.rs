//! Workflow engine

pub mod core;

use crate::error::StorageError;
use crate::workflow::run::CANCELLED_BY_USER;
use crate::workflow::{Plan, RunStatus, StepResult, TransitionError};
use thiserror::Error;

/// Errors surfaced by engine operations
///
/// Step-level failures never appear here; they are recorded in `past_steps`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Plan generation failed or produced an unusable plan; the run is failed
    #[error("Planning failed: {reason}")]
    Planning {
        /// Failure description, also stored as the run error
        reason: String,
    },
    /// Synthesis failed; the run is failed with its step results kept
    #[error("Execution failed: {reason}")]
    Execution {
        /// Failure description, also stored as the run error
        reason: String,
    },
    /// The run was cancelled
    #[error("{}", CANCELLED_BY_USER)]
    Cancelled,
    /// The operation needs a plan and the run has none
    #[error("Run has no plan")]
    NoPlan,
    /// Steps cannot run before the plan is approved
    #[error("Plan is awaiting approval")]
    ApprovalRequired,
    /// The run already reached a terminal status
    #[error("Run already {status}")]
    RunTerminal {
        /// Terminal status
        status: RunStatus,
    },
    /// The state machine refused the transition
    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),
    /// A checkpoint could not be written or read
    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] StorageError),
}

impl EngineError {
    /// Whether this error put the run into the failed state
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Planning { .. } | EngineError::Execution { .. } | EngineError::Cancelled
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Event recorded during a run
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    /// When the event occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Type of execution event
    pub event_type: ExecutionEventType,
    /// Human-readable details about the event
    pub details: String,
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionEventType {
    /// Plan generation requested
    PlanningStarted,
    /// A plan was accepted and awaits approval
    PlanCreated,
    /// The plan was approved
    Approved,
    /// The plan was rejected for a replan
    Rejected,
    /// A step finished
    StepExecuted,
    /// The run completed with an answer
    Completed,
    /// The run failed
    Failed,
}

impl std::fmt::Display for ExecutionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionEventType::PlanningStarted => "PlanningStarted",
            ExecutionEventType::PlanCreated => "PlanCreated",
            ExecutionEventType::Approved => "Approved",
            ExecutionEventType::Rejected => "Rejected",
            ExecutionEventType::StepExecuted => "StepExecuted",
            ExecutionEventType::Completed => "Completed",
            ExecutionEventType::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// What `approve_and_execute` produced
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    /// Approved and ran to completion
    Completed {
        /// Synthesized final answer
        answer: String,
    },
    /// Rejected; a new plan awaits approval
    Replanned(Plan),
}

impl ApprovalOutcome {
    /// The final answer, if the run completed
    pub fn answer(&self) -> Option<&str> {
        match self {
            ApprovalOutcome::Completed { answer } => Some(answer),
            ApprovalOutcome::Replanned(_) => None,
        }
    }

    /// The new plan, if the run was replanned
    pub fn plan(&self) -> Option<&Plan> {
        match self {
            ApprovalOutcome::Completed { .. } => None,
            ApprovalOutcome::Replanned(plan) => Some(plan),
        }
    }
}

/// What one `execute_next_step` call did
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A step ran and its result was checkpointed
    Continued(StepResult),
    /// No steps remained; the answer was synthesized and the run completed
    Finished(String),
}

pub use self::core::WorkflowEngine;
