//! Single-step execution
//!
//! The executor runs a bounded reason/act loop for one step. It never returns an
//! error: every failure, including a panic inside a collaborator, becomes a failed
//! `StepResult`.

use crate::collaborators::{AgentAction, Collaborators, Observation, ReasoningRequest, StepReasoner};
use crate::config::EngineConfig;
use crate::tools::ToolRegistry;
use crate::workflow::{Step, StepResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Executes one step against a run's tool registry
#[derive(Clone)]
pub struct StepExecutor {
    reasoner: Arc<dyn StepReasoner>,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
}

impl StepExecutor {
    /// Create an executor with an explicit reasoning ceiling
    pub fn new(
        reasoner: Arc<dyn StepReasoner>,
        tools: Arc<ToolRegistry>,
        max_iterations: usize,
    ) -> Self {
        Self {
            reasoner,
            tools,
            max_iterations: max_iterations.max(1),
        }
    }

    /// Executor for a run's collaborators
    pub fn from_collaborators(collaborators: &Collaborators, config: &EngineConfig) -> Self {
        Self::new(
            collaborators.reasoner.clone(),
            collaborators.tools.clone(),
            config.max_step_iterations,
        )
    }

    /// Maximum reasoning cycles per step
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Execute `step` with `context` as working memory
    pub async fn execute(&self, step: &Step, context: &str) -> StepResult {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let mut tools_used = Vec::new();

        let outcome = AssertUnwindSafe(self.run_loop(step, context, &mut tools_used))
            .catch_unwind()
            .await;
        let duration = start.elapsed();

        match outcome {
            Ok(Ok(output)) => {
                tracing::debug!(
                    "Step '{}' succeeded in {:?} using {:?}",
                    step.description,
                    duration,
                    tools_used
                );
                StepResult::success(step, output, tools_used, duration, started_at)
            }
            Ok(Err(error)) => {
                tracing::warn!("Step '{}' failed: {}", step.description, error);
                StepResult::failure(step, error, tools_used, duration, started_at)
            }
            Err(panic) => {
                let error = format!("Step execution panicked: {}", panic_message(panic.as_ref()));
                tracing::error!("Step '{}' {}", step.description, error);
                StepResult::failure(step, error, tools_used, duration, started_at)
            }
        }
    }

    async fn run_loop(
        &self,
        step: &Step,
        context: &str,
        tools_used: &mut Vec<String>,
    ) -> Result<String, String> {
        let schemas = self.tools.schemas();
        let mut observations: Vec<Observation> = Vec::new();

        for iteration in 0..self.max_iterations {
            let request = ReasoningRequest {
                step,
                tools: &schemas,
                context,
                observations: &observations,
                iteration,
            };

            let action = self
                .reasoner
                .next_action(request)
                .await
                .map_err(|e| format!("Reasoning failed: {}", e))?;

            match action {
                AgentAction::Finish { output } => {
                    return Ok(match observations.pop() {
                        Some(last) => last.output,
                        None => output,
                    });
                }
                AgentAction::CallTool { tool, input } => {
                    let handle = self
                        .tools
                        .get(&tool)
                        .ok_or_else(|| format!("Unknown tool '{}'", tool))?;
                    tools_used.push(tool.clone());
                    tracing::debug!(
                        "Step '{}' iteration {} calling '{}'",
                        step.description,
                        iteration,
                        tool
                    );

                    let output = handle.invoke(input.clone()).await.map_err(|e| e.to_string())?;
                    observations.push(Observation { tool, input, output });
                }
            }
        }

        Err(format!("exceeded {} reasoning iterations", self.max_iterations))
    }
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("tools", &self.tools)
            .field("max_iterations", &self.max_iterations)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Working memory for the next step: every earlier result, in plan order
pub fn build_context(results: &[StepResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut block = format!("Step {}: {}\nResult: {}\n", i + 1, r.step, r.result);
            if let Some(error) = &r.error {
                block.push_str(&format!("Error: {}\n", error));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use crate::test_utils::{step_failed, step_ok, MockTool, ScriptedReasoner};
    use async_trait::async_trait;
    use serde_json::json;

    fn tools() -> Arc<ToolRegistry> {
        Arc::new(
            ToolRegistry::new()
                .with_tool(MockTool::ok("uniprot_search", "P04637"))
                .with_tool(MockTool::ok("blast", "3 hits"))
                .with_tool(MockTool::err("pdb_fetch", "service unavailable")),
        )
    }

    fn call(tool: &str) -> AgentAction {
        AgentAction::CallTool {
            tool: tool.to_string(),
            input: json!({}),
        }
    }

    fn finish(output: &str) -> AgentAction {
        AgentAction::Finish {
            output: output.to_string(),
        }
    }

    fn step() -> Step {
        Step::new("Search UniProt for TP53", "uniprot_search")
    }

    #[tokio::test]
    async fn test_result_is_last_tool_output() {
        let reasoner = ScriptedReasoner::new(vec![
            call("uniprot_search"),
            call("blast"),
            finish("commentary"),
        ]);
        let executor = StepExecutor::new(Arc::new(reasoner), tools(), 5);

        let result = executor.execute(&step(), "").await;
        assert!(result.success);
        assert_eq!(result.result, "3 hits");
        assert_eq!(result.tools_used, vec!["uniprot_search", "blast"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_reasoner_output_without_tools() {
        let reasoner = ScriptedReasoner::new(vec![finish("no lookup needed")]);
        let executor = StepExecutor::new(Arc::new(reasoner), tools(), 5);

        let result = executor.execute(&step(), "").await;
        assert!(result.success);
        assert_eq!(result.result, "no lookup needed");
        assert!(result.tools_used.is_empty());
    }

    #[tokio::test]
    async fn test_tool_error_becomes_failed_result() {
        let reasoner = ScriptedReasoner::new(vec![call("uniprot_search"), call("pdb_fetch")]);
        let executor = StepExecutor::new(Arc::new(reasoner), tools(), 5);

        let result = executor.execute(&step(), "").await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("service unavailable"));
        assert_eq!(result.tools_used, vec!["uniprot_search", "pdb_fetch"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_step() {
        let reasoner = ScriptedReasoner::new(vec![call("alphafold")]);
        let executor = StepExecutor::new(Arc::new(reasoner), tools(), 5);

        let result = executor.execute(&step(), "").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool 'alphafold'"));
        assert!(result.tools_used.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_ceiling() {
        let reasoner = ScriptedReasoner::new(vec![call("blast"); 10]);
        let executor = StepExecutor::new(Arc::new(reasoner), tools(), 5);

        let result = executor.execute(&step(), "").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("exceeded 5 reasoning iterations"));
        assert_eq!(result.tools_used.len(), 5);
    }

    struct PanickingReasoner;

    #[async_trait]
    impl StepReasoner for PanickingReasoner {
        async fn next_action(
            &self,
            _request: ReasoningRequest<'_>,
        ) -> Result<AgentAction, CollaboratorError> {
            panic!("model client crashed");
        }
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let executor = StepExecutor::new(Arc::new(PanickingReasoner), tools(), 5);
        let result = executor.execute(&step(), "").await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("model client crashed"));
    }

    #[tokio::test]
    async fn test_reasoner_error_fails_step() {
        let reasoner = ScriptedReasoner::failing("rate limited");
        let executor = StepExecutor::new(Arc::new(reasoner), tools(), 5);
        let result = executor.execute(&step(), "").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Reasoning failed: rate limited"));
    }

    #[test]
    fn test_build_context_format() {
        assert_eq!(build_context(&[]), "");

        let first = Step::new("Look up type 2 diabetes", "disease_lookup");
        let second = Step::new("Find targets for MONDO:0005148", "target_search");
        let results = vec![
            step_ok(&first, "MONDO:0005148"),
            step_failed(&second, "timeout"),
        ];

        assert_eq!(
            build_context(&results),
            "Step 1: Look up type 2 diabetes\nResult: MONDO:0005148\n\n\
             Step 2: Find targets for MONDO:0005148\nResult: \nError: timeout\n"
        );
    }
}
