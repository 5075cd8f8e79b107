//! Plans and steps

use crate::common::generate_monotonic_ulid;
use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Reasons a generated plan is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Steps and tool names were supplied as lists of different length
    #[error("Plan has {steps} steps but {tool_calls} tool calls")]
    LengthMismatch {
        /// Number of step descriptions
        steps: usize,
        /// Number of tool names
        tool_calls: usize,
    },
    /// A step has no description
    #[error("Step {index} has an empty description")]
    EmptyDescription {
        /// Zero-based step index
        index: usize,
    },
    /// A step names no tool
    #[error("Step {index} does not name a tool")]
    MissingTool {
        /// Zero-based step index
        index: usize,
    },
    /// A step names a tool the registry does not have
    #[error("Step {index} uses unknown tool '{tool}'")]
    UnknownTool {
        /// Zero-based step index
        index: usize,
        /// The unknown tool name
        tool: String,
    },
}

/// Unique identifier for plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(Ulid);

impl PlanId {
    /// Create a new plan ID
    pub fn new() -> Self {
        Self(generate_monotonic_ulid())
    }

    /// Parse a PlanId from its string form
    pub fn parse(s: &str) -> Result<Self, String> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| format!("Invalid plan ID '{}': {}", s, e))
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One atomic unit of work bound to exactly one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Self-contained instruction, including every parameter value it needs
    pub description: String,
    /// The tool this step is expected to use
    pub tool: String,
}

impl Step {
    /// Create a step
    pub fn new(description: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            tool: tool.into(),
        }
    }
}

/// Unvalidated plan as returned by a plan generator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanDraft {
    /// Ordered steps
    pub steps: Vec<Step>,
    /// Free-form duration estimate, e.g. "2-3 minutes"
    #[serde(default)]
    pub estimated_duration: Option<String>,
}

impl PlanDraft {
    /// Draft from ordered steps
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            estimated_duration: None,
        }
    }

    /// Draft from index-aligned step texts and tool names
    pub fn from_parallel(steps: Vec<String>, tool_calls: Vec<String>) -> Result<Self, PlanError> {
        if steps.len() != tool_calls.len() {
            return Err(PlanError::LengthMismatch {
                steps: steps.len(),
                tool_calls: tool_calls.len(),
            });
        }
        Ok(Self::new(
            steps
                .into_iter()
                .zip(tool_calls)
                .map(|(description, tool)| Step { description, tool })
                .collect(),
        ))
    }

    /// Attach a duration estimate
    pub fn with_estimated_duration(mut self, estimate: impl Into<String>) -> Self {
        self.estimated_duration = Some(estimate.into());
        self
    }

    /// Check every step against the tool registry
    pub fn validate(&self, tools: &ToolRegistry) -> Result<(), PlanError> {
        for (index, step) in self.steps.iter().enumerate() {
            if step.description.trim().is_empty() {
                return Err(PlanError::EmptyDescription { index });
            }
            if step.tool.trim().is_empty() {
                return Err(PlanError::MissingTool { index });
            }
            if !tools.contains(&step.tool) {
                return Err(PlanError::UnknownTool {
                    index,
                    tool: step.tool.clone(),
                });
            }
        }
        Ok(())
    }
}

/// An ordered, immutable list of tool-annotated steps
///
/// Replanning produces a new `Plan` with a new id; a plan is never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique identifier
    pub id: PlanId,
    /// Ordered steps
    steps: Vec<Step>,
    /// When the plan was created
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Optional duration estimate from the planner
    pub estimated_duration: Option<String>,
}

impl Plan {
    /// Validate a draft and stamp it with an id and creation time
    pub fn from_draft(draft: PlanDraft, tools: &ToolRegistry) -> Result<Self, PlanError> {
        draft.validate(tools)?;
        Ok(Self {
            id: PlanId::new(),
            steps: draft.steps,
            created_at: chrono::Utc::now(),
            estimated_duration: draft.estimated_duration,
        })
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step at `index`
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Tool names, index-aligned with `steps()`
    pub fn tool_calls(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.tool.as_str()).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
