//! Run state transitions
//!
//! `RunState::apply` is the only place a run's state changes. It is a pure
//! function of `(status, event)`: collaborator calls and checkpoint writes happen
//! in the engine, which feeds their outcomes back in as events.

use crate::workflow::run::CANCELLED_BY_USER;
use crate::workflow::{Plan, RunState, RunStatus, StepResult};
use thiserror::Error;

/// Something that happened to a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// A plan was requested; `task` replaces the run's task when present
    PlanningStarted {
        /// New task text
        task: Option<String>,
    },
    /// The plan generator produced a valid plan
    PlanCreated(Plan),
    /// Planning failed; run-fatal
    PlanningFailed(String),
    /// The human approved the current plan
    Approved,
    /// The human rejected the current plan and asked for a new one
    Rejected {
        /// Feedback for the replan; the original task is used when absent
        modifications: Option<String>,
    },
    /// The next step finished, successfully or not
    StepRecorded(StepResult),
    /// The final answer was produced
    Synthesized(String),
    /// Synthesis failed; run-fatal
    SynthesisFailed(String),
    /// The run was cancelled
    Cancelled,
}

impl RunEvent {
    /// Short event name for errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::PlanningStarted { .. } => "planning_started",
            RunEvent::PlanCreated(_) => "plan_created",
            RunEvent::PlanningFailed(_) => "planning_failed",
            RunEvent::Approved => "approved",
            RunEvent::Rejected { .. } => "rejected",
            RunEvent::StepRecorded(_) => "step_recorded",
            RunEvent::Synthesized(_) => "synthesized",
            RunEvent::SynthesisFailed(_) => "synthesis_failed",
            RunEvent::Cancelled => "cancelled",
        }
    }
}

/// Rejected transitions; the state is left untouched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The run already finished
    #[error("Run is already {status}; no further transitions are allowed")]
    Terminal {
        /// Terminal status of the run
        status: RunStatus,
    },
    /// The event does not apply in the current status
    #[error("Event '{event}' is not valid while the run is {status}")]
    InvalidTransition {
        /// Status at the time of the event
        status: RunStatus,
        /// Event name
        event: &'static str,
    },
    /// A step result arrived for a step other than the next one
    #[error("Result for step '{got}' does not match the next planned step '{expected}'")]
    StepMismatch {
        /// Description of the next planned step
        expected: String,
        /// Description carried by the result
        got: String,
    },
    /// Every planned step already has a result
    #[error("All {total} planned steps already have results")]
    PlanExhausted {
        /// Number of planned steps
        total: usize,
    },
    /// Synthesis attempted before all steps ran
    #[error("Cannot finish while {remaining} planned steps have not run")]
    StepsRemaining {
        /// Steps without a result
        remaining: usize,
    },
}

impl RunState {
    /// Apply `event`, or return why it is not allowed without changing anything
    pub fn apply(&mut self, event: RunEvent) -> Result<(), TransitionError> {
        use RunStatus::*;

        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                status: self.status,
            });
        }

        match (self.status, event) {
            (_, RunEvent::Cancelled) => self.fail(CANCELLED_BY_USER.to_string()),

            (
                Pending | Planning | AwaitingApproval | Executing,
                RunEvent::PlanningStarted { task },
            ) => {
                if let Some(task) = task {
                    self.task = task;
                    self.modification_request = None;
                }
                self.discard_plan();
                self.status = Planning;
            }

            (Planning, RunEvent::PlanCreated(plan)) => {
                self.plan = Some(plan);
                self.current_step_index = 0;
                self.past_steps.clear();
                self.needs_approval = true;
                self.status = AwaitingApproval;
            }

            (Pending | Planning, RunEvent::PlanningFailed(reason)) => self.fail(reason),

            (AwaitingApproval, RunEvent::Approved) => {
                self.needs_approval = false;
                self.status = Executing;
            }

            (AwaitingApproval | Executing, RunEvent::Rejected { modifications }) => {
                self.modification_request = modifications;
                self.discard_plan();
                self.status = Planning;
            }

            (Executing, RunEvent::StepRecorded(result)) => self.record_step(result)?,

            (Executing, RunEvent::Synthesized(answer)) => {
                let remaining = self.total_steps().saturating_sub(self.current_step_index);
                if self.plan.is_none() || remaining > 0 {
                    return Err(TransitionError::StepsRemaining { remaining });
                }
                self.final_response = Some(answer);
                self.status = Completed;
            }

            (Executing, RunEvent::SynthesisFailed(reason)) => self.fail(reason),

            (status, event) => {
                return Err(TransitionError::InvalidTransition {
                    status,
                    event: event.name(),
                })
            }
        }

        self.updated_at = chrono::Utc::now();
        Ok(())
    }

    fn record_step(&mut self, result: StepResult) -> Result<(), TransitionError> {
        let expected = match self.next_step() {
            Some(step) => step,
            None => {
                return Err(TransitionError::PlanExhausted {
                    total: self.total_steps(),
                })
            }
        };
        if expected.description != result.step {
            return Err(TransitionError::StepMismatch {
                expected: expected.description.clone(),
                got: result.step,
            });
        }
        self.past_steps.push(result);
        self.current_step_index = self.past_steps.len();
        Ok(())
    }

    fn discard_plan(&mut self) {
        self.plan = None;
        self.current_step_index = 0;
        self.past_steps.clear();
        self.needs_approval = false;
    }

    fn fail(&mut self, reason: String) {
        self.error = Some(reason);
        self.final_response = None;
        self.needs_approval = false;
        self.status = RunStatus::Failed;
    }
}
