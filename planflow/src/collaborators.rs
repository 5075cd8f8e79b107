//! External capability contracts
//!
//! Planning, per-step tool selection and answer synthesis are black boxes to the
//! engine. Each is a narrow async trait injected into every engine instance; none
//! of them is expected to keep state between calls.

use crate::tools::{ToolRegistry, ToolSchema};
use crate::workflow::{PlanDraft, Step, StepResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by collaborator implementations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CollaboratorError {
    /// The capability was reached but could not produce a result
    #[error("{0}")]
    Failed(String),

    /// The capability answered with something unusable
    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    /// The backing service could not be reached
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Any other implementation error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Produces a plan for a task
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    /// Break `task` into ordered steps, each bound to exactly one of `tools`
    ///
    /// Steps must be self-contained: every parameter a step needs has to be
    /// written into its description, the engine substitutes nothing.
    async fn generate_plan(
        &self,
        task: &str,
        tools: &[ToolSchema],
    ) -> Result<PlanDraft, CollaboratorError>;
}

/// A tool call observed while executing a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Tool that was called
    pub tool: String,
    /// Input the tool received
    pub input: Value,
    /// What the tool returned
    pub output: String,
}

/// Everything a reasoner sees when choosing its next action
#[derive(Debug, Clone, Copy)]
pub struct ReasoningRequest<'a> {
    /// The step being executed
    pub step: &'a Step,
    /// Tools the step may call
    pub tools: &'a [ToolSchema],
    /// Step text and results of all earlier steps
    pub context: &'a str,
    /// Tool calls already made for this step, in order
    pub observations: &'a [Observation],
    /// Zero-based reasoning cycle
    pub iteration: usize,
}

/// Next move chosen by a reasoner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Invoke a registered tool
    CallTool {
        /// Tool name
        tool: String,
        /// Tool input
        input: Value,
    },
    /// Stop; `output` is used only when no tool was called
    Finish {
        /// Free-text answer for the step
        output: String,
    },
}

/// Chooses tool calls for a single step
#[async_trait]
pub trait StepReasoner: Send + Sync {
    /// Decide the next action for the step described by `request`
    async fn next_action(
        &self,
        request: ReasoningRequest<'_>,
    ) -> Result<AgentAction, CollaboratorError>;
}

/// Writes the final answer from the task and all step results
#[async_trait]
pub trait ResponseSynthesizer: Send + Sync {
    /// Explain the overall outcome, covering failed steps as well as successful ones
    async fn synthesize(
        &self,
        task: &str,
        results: &[StepResult],
    ) -> Result<String, CollaboratorError>;
}

/// The collaborators and tools one engine instance works with
#[derive(Clone)]
pub struct Collaborators {
    /// Plan generation
    pub planner: Arc<dyn PlanGenerator>,
    /// Per-step tool selection
    pub reasoner: Arc<dyn StepReasoner>,
    /// Final answer synthesis
    pub synthesizer: Arc<dyn ResponseSynthesizer>,
    /// Tools available to this run
    pub tools: Arc<ToolRegistry>,
}

impl Collaborators {
    /// Bundle collaborators for an engine
    pub fn new(
        planner: Arc<dyn PlanGenerator>,
        reasoner: Arc<dyn StepReasoner>,
        synthesizer: Arc<dyn ResponseSynthesizer>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            planner,
            reasoner,
            synthesizer,
            tools: Arc::new(tools),
        }
    }

    /// Same collaborators with a different tool registry
    pub fn with_tools(&self, tools: ToolRegistry) -> Self {
        Self {
            tools: Arc::new(tools),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}
