//! Scripted collaborators and mock tools for tests
//!
//! Compiled into the library so integration tests can share them.

use crate::collaborators::{
    AgentAction, CollaboratorError, Collaborators, PlanGenerator, ReasoningRequest,
    ResponseSynthesizer, StepReasoner,
};
use crate::tools::{Tool, ToolError, ToolRegistry, ToolSchema};
use crate::workflow::{Plan, PlanDraft, Step, StepResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Steps of the disease-target research task used throughout the tests
pub const RESEARCH_STEPS: [(&str, &str); 4] = [
    ("Look up disease X in the MONDO ontology", "disease_lookup"),
    ("Find protein targets associated with MONDO:0000001", "target_search"),
    ("Rank the targets TP53, BRCA1 and EGFR by tractability", "tractability_score"),
    ("Run sequence analysis on TP53", "sequence_analysis"),
];

/// Tool returning a fixed output or a fixed error, recording its inputs
pub struct MockTool {
    name: String,
    outcome: std::result::Result<String, String>,
    inputs: Mutex<Vec<Value>>,
}

impl MockTool {
    /// Tool that always succeeds with `output`
    pub fn ok(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Ok(output.to_string()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Tool that always fails with `reason`
    pub fn err(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Err(reason.to_string()),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Inputs received so far
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool"
    }

    async fn invoke(&self, input: Value) -> std::result::Result<String, ToolError> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input);
        }
        match &self.outcome {
            Ok(output) => Ok(output.clone()),
            Err(reason) => Err(ToolError::ExecutionFailed {
                tool: self.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Tool that blocks until its gate is released
pub struct GatedTool {
    name: String,
    output: String,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

/// Control side of a [`GatedTool`]
#[derive(Clone)]
pub struct ToolGate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl GatedTool {
    /// Create a gated tool and its gate
    pub fn new(name: &str, output: &str) -> (Self, ToolGate) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let tool = Self {
            name: name.to_string(),
            output: output.to_string(),
            started: started.clone(),
            release: release.clone(),
        };
        (tool, ToolGate { started, release })
    }
}

impl ToolGate {
    /// Wait until the tool has been invoked
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let the blocked invocation return
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Tool for GatedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Tool that waits for a signal"
    }

    async fn invoke(&self, _input: Value) -> std::result::Result<String, ToolError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.output.clone())
    }
}

/// Reasoner replaying a fixed list of actions, then finishing
pub struct ScriptedReasoner {
    actions: Mutex<VecDeque<AgentAction>>,
    error: Option<String>,
}

impl ScriptedReasoner {
    /// Replay `actions` in order
    pub fn new(actions: Vec<AgentAction>) -> Self {
        Self {
            actions: Mutex::new(actions.into()),
            error: None,
        }
    }

    /// Reasoner that always errors
    pub fn failing(reason: &str) -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
            error: Some(reason.to_string()),
        }
    }
}

#[async_trait]
impl StepReasoner for ScriptedReasoner {
    async fn next_action(
        &self,
        _request: ReasoningRequest<'_>,
    ) -> std::result::Result<AgentAction, CollaboratorError> {
        if let Some(reason) = &self.error {
            return Err(CollaboratorError::Failed(reason.clone()));
        }
        let next = self.actions.lock().ok().and_then(|mut a| a.pop_front());
        Ok(next.unwrap_or(AgentAction::Finish {
            output: "done".to_string(),
        }))
    }
}

/// Reasoner that calls each step's declared tool once, then finishes
///
/// The tool input carries the step text and context, and every context seen on
/// the first cycle of a step is recorded.
#[derive(Default)]
pub struct ToolCallingReasoner {
    contexts: Mutex<Vec<String>>,
}

impl ToolCallingReasoner {
    /// Create a reasoner
    pub fn new() -> Self {
        Self::default()
    }

    /// Contexts seen, one per executed step
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StepReasoner for ToolCallingReasoner {
    async fn next_action(
        &self,
        request: ReasoningRequest<'_>,
    ) -> std::result::Result<AgentAction, CollaboratorError> {
        if request.observations.is_empty() {
            if let Ok(mut contexts) = self.contexts.lock() {
                contexts.push(request.context.to_string());
            }
            return Ok(AgentAction::CallTool {
                tool: request.step.tool.clone(),
                input: json!({
                    "step": request.step.description,
                    "context": request.context,
                }),
            });
        }
        Ok(AgentAction::Finish {
            output: "done".to_string(),
        })
    }
}

/// Planner returning scripted drafts in order, repeating the last one
pub struct StaticPlanner {
    drafts: Mutex<VecDeque<PlanDraft>>,
    last: PlanDraft,
    tasks: Mutex<Vec<String>>,
}

impl StaticPlanner {
    /// Planner that always returns `draft`
    pub fn new(draft: PlanDraft) -> Self {
        Self::from_drafts(vec![draft])
    }

    /// Planner returning `drafts` in order
    pub fn from_drafts(drafts: Vec<PlanDraft>) -> Self {
        let last = drafts.last().cloned().unwrap_or_default();
        Self {
            drafts: Mutex::new(drafts.into()),
            last,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Planner returning the first `steps` research steps
    pub fn research(steps: usize) -> Self {
        Self::new(research_draft(steps))
    }

    /// Tasks the planner was asked to plan, in order
    pub fn tasks(&self) -> Vec<String> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PlanGenerator for StaticPlanner {
    async fn generate_plan(
        &self,
        task: &str,
        _tools: &[ToolSchema],
    ) -> std::result::Result<PlanDraft, CollaboratorError> {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task.to_string());
        }
        let next = self.drafts.lock().ok().and_then(|mut d| d.pop_front());
        Ok(next.unwrap_or_else(|| self.last.clone()))
    }
}

#[async_trait]
impl PlanGenerator for Arc<StaticPlanner> {
    async fn generate_plan(
        &self,
        task: &str,
        tools: &[ToolSchema],
    ) -> std::result::Result<PlanDraft, CollaboratorError> {
        self.as_ref().generate_plan(task, tools).await
    }
}

/// Planner that always fails
pub struct FailingPlanner(pub String);

#[async_trait]
impl PlanGenerator for FailingPlanner {
    async fn generate_plan(
        &self,
        _task: &str,
        _tools: &[ToolSchema],
    ) -> std::result::Result<PlanDraft, CollaboratorError> {
        Err(CollaboratorError::Unavailable(self.0.clone()))
    }
}

/// Synthesizer listing every step outcome
#[derive(Default)]
pub struct JoiningSynthesizer;

#[async_trait]
impl ResponseSynthesizer for JoiningSynthesizer {
    async fn synthesize(
        &self,
        task: &str,
        results: &[StepResult],
    ) -> std::result::Result<String, CollaboratorError> {
        let outcomes: Vec<String> = results
            .iter()
            .map(|r| match &r.error {
                None => format!("{} -> {}", r.step, r.result),
                Some(error) => format!("{} -> failed: {}", r.step, error),
            })
            .collect();
        Ok(format!("Answer for '{}': {}", task, outcomes.join("; ")))
    }
}

/// Synthesizer that always fails
pub struct FailingSynthesizer(pub String);

#[async_trait]
impl ResponseSynthesizer for FailingSynthesizer {
    async fn synthesize(
        &self,
        _task: &str,
        _results: &[StepResult],
    ) -> std::result::Result<String, CollaboratorError> {
        Err(CollaboratorError::Failed(self.0.clone()))
    }
}

/// Draft with the first `steps` research steps, cycling when more are asked for
pub fn research_draft(steps: usize) -> PlanDraft {
    PlanDraft::new(
        (0..steps)
            .map(|i| {
                let (description, tool) = RESEARCH_STEPS[i % RESEARCH_STEPS.len()];
                if i < RESEARCH_STEPS.len() {
                    Step::new(description, tool)
                } else {
                    let pass = i / RESEARCH_STEPS.len() + 1;
                    Step::new(format!("{} (pass {})", description, pass), tool)
                }
            })
            .collect(),
    )
}

/// Registry with a succeeding mock for every research tool
pub fn research_tools() -> ToolRegistry {
    RESEARCH_STEPS
        .iter()
        .fold(ToolRegistry::new(), |registry, (_, tool)| {
            registry.with_tool(MockTool::ok(tool, &format!("{} output", tool)))
        })
}

/// Validated plan with `steps` research steps
pub fn sample_plan(steps: usize) -> Plan {
    Plan::from_draft(research_draft(steps), &research_tools())
        .unwrap_or_else(|e| panic!("research draft is invalid: {}", e))
}

/// Collaborators for the research task with the given planner
pub fn research_collaborators<P: PlanGenerator + 'static>(planner: P) -> Collaborators {
    Collaborators::new(
        Arc::new(planner),
        Arc::new(ToolCallingReasoner::new()),
        Arc::new(JoiningSynthesizer),
        research_tools(),
    )
}

/// Successful result for `step`
pub fn step_ok(step: &Step, result: &str) -> StepResult {
    StepResult::success(
        step,
        result,
        vec![step.tool.clone()],
        Duration::from_millis(5),
        chrono::Utc::now(),
    )
}

/// Failed result for `step`
pub fn step_failed(step: &Step, error: &str) -> StepResult {
    StepResult::failure(
        step,
        error,
        vec![step.tool.clone()],
        Duration::from_millis(5),
        chrono::Utc::now(),
    )
}
