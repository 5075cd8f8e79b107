//! Run state: the unit that gets checkpointed

use crate::common::generate_monotonic_ulid;
use crate::workflow::{Plan, Step};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;

/// Error text recorded when a run is cancelled
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Unique identifier for workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    /// Create a new run ID
    pub fn new() -> Self {
        Self(generate_monotonic_ulid())
    }

    /// Parse a RunId from a string representation
    pub fn parse(s: &str) -> Result<Self, String> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| format!("Invalid run ID '{}': {}", s, e))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, no plan requested yet
    Pending,
    /// A plan generator call is in flight
    Planning,
    /// A plan exists and waits for a human decision
    AwaitingApproval,
    /// Approved; steps are being executed
    Executing,
    /// Finished with a final answer
    Completed,
    /// Finished with a run-fatal error
    Failed,
}

impl RunStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Get the string representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Planning => "planning",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Executing => "executing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of executing one step
///
/// A failed step is data, not an error: the run records it and moves on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Text of the step that produced this result
    pub step: String,
    /// Output of the last tool call, or the reasoner's own answer; empty on failure
    pub result: String,
    /// Whether the step succeeded
    pub success: bool,
    /// Failure description
    pub error: Option<String>,
    /// Every tool invoked while executing the step, in call order
    pub tools_used: Vec<String>,
    /// Time spent on the step, up to the failure point for failed steps
    pub duration: Duration,
    /// When execution of the step began
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl StepResult {
    /// Successful step
    pub fn success(
        step: &Step,
        result: impl Into<String>,
        tools_used: Vec<String>,
        duration: Duration,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            step: step.description.clone(),
            result: result.into(),
            success: true,
            error: None,
            tools_used,
            duration,
            started_at,
        }
    }

    /// Failed step
    pub fn failure(
        step: &Step,
        error: impl Into<String>,
        tools_used: Vec<String>,
        duration: Duration,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            step: step.description.clone(),
            result: String::new(),
            success: false,
            error: Some(error.into()),
            tools_used,
            duration,
            started_at,
        }
    }
}

/// Full state of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Run identifier
    pub id: RunId,
    /// Lifecycle status
    pub status: RunStatus,
    /// Task as originally submitted
    pub task: String,
    /// Current plan, absent before planning completes and while replanning
    pub plan: Option<Plan>,
    /// Index of the next step to execute; always equals `past_steps.len()`
    pub current_step_index: usize,
    /// Results in plan order, append-only
    pub past_steps: Vec<StepResult>,
    /// Synthesized answer, set only on completion
    pub final_response: Option<String>,
    /// Whether the current plan waits for approval
    pub needs_approval: bool,
    /// Run-fatal error, set only on failure
    pub error: Option<String>,
    /// Latest rejection feedback used for replanning
    pub modification_request: Option<String>,
    /// When the run was created
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the state last changed
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl RunState {
    /// Fresh run with no task yet
    pub fn new(id: RunId) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            status: RunStatus::Pending,
            task: String::new(),
            plan: None,
            current_step_index: 0,
            past_steps: Vec::new(),
            final_response: None,
            needs_approval: false,
            error: None,
            modification_request: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Task text used for planning and synthesis
    pub fn effective_task(&self) -> String {
        match self.modification_request.as_deref() {
            Some(modifications) if !modifications.trim().is_empty() => format!(
                "{}\n\nRequested modifications: {}",
                self.task, modifications
            ),
            _ => self.task.clone(),
        }
    }

    /// Whether the run can no longer change
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of steps in the current plan
    pub fn total_steps(&self) -> usize {
        self.plan.as_ref().map_or(0, Plan::len)
    }

    /// Whether every planned step has a result
    pub fn all_steps_recorded(&self) -> bool {
        self.plan.is_some() && self.current_step_index >= self.total_steps()
    }

    /// The step `current_step_index` points at
    pub fn next_step(&self) -> Option<&Step> {
        self.plan
            .as_ref()
            .and_then(|plan| plan.step(self.current_step_index))
    }

    /// Aggregate counts for display and monitoring
    pub fn summary(&self) -> RunSummary {
        let succeeded = self.past_steps.iter().filter(|r| r.success).count();
        RunSummary {
            status: self.status,
            total_steps: self.total_steps(),
            executed: self.past_steps.len(),
            succeeded,
            failed: self.past_steps.len() - succeeded,
            total_duration: self.past_steps.iter().map(|r| r.duration).sum(),
        }
    }
}

/// Aggregate view of a run's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Current status
    pub status: RunStatus,
    /// Steps in the current plan
    pub total_steps: usize,
    /// Steps executed so far
    pub executed: usize,
    /// Executed steps that succeeded
    pub succeeded: usize,
    /// Executed steps that failed
    pub failed: usize,
    /// Sum of step durations
    pub total_duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_creation_and_parse() {
        let id1 = RunId::new();
        let id2 = RunId::new();
        assert_ne!(id1, id2);

        let parsed = RunId::parse(&id1.to_string()).unwrap();
        assert_eq!(parsed, id1);

        let err = RunId::parse("invalid-ulid").unwrap_err();
        assert!(err.contains("Invalid run ID"));
    }

    #[test]
    fn test_new_run_state() {
        let state = RunState::new(RunId::new());
        assert_eq!(state.status, RunStatus::Pending);
        assert!(state.plan.is_none());
        assert!(!state.all_steps_recorded());
        assert!(state.next_step().is_none());
        assert_eq!(state.summary().total_steps, 0);
    }

    #[test]
    fn test_effective_task_includes_modifications() {
        let mut state = RunState::new(RunId::new());
        state.task = "find targets for disease X".to_string();
        assert_eq!(state.effective_task(), "find targets for disease X");

        state.modification_request = Some("add sequence analysis".to_string());
        let task = state.effective_task();
        assert!(task.starts_with("find targets for disease X"));
        assert!(task.ends_with("Requested modifications: add sequence analysis"));

        state.modification_request = Some("   ".to_string());
        assert_eq!(state.effective_task(), "find targets for disease X");
    }

    #[test]
    fn test_step_result_constructors() {
        let step = Step::new("Search UniProt for TP53", "uniprot_search");
        let now = chrono::Utc::now();

        let ok = StepResult::success(
            &step,
            "P04637",
            vec!["uniprot_search".into()],
            Duration::from_millis(12),
            now,
        );
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.step, "Search UniProt for TP53");

        let failed = StepResult::failure(&step, "timeout", vec![], Duration::from_millis(30), now);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("timeout"));
        assert!(failed.result.is_empty());
    }

    #[test]
    fn test_status_terminal_and_serialization() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::AwaitingApproval.is_terminal());
        assert_eq!(
            serde_json::to_string(&RunStatus::AwaitingApproval).unwrap(),
            "\"awaiting_approval\""
        );
    }
}
