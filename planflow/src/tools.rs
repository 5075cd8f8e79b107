//! Tool registry
//!
//! The host supplies tools; the engine never runs tool logic itself, it only
//! routes calls by name through the registry handed to each run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by tool invocations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The input did not satisfy the tool's contract
    #[error("Invalid input for tool '{tool}': {reason}")]
    InvalidInput {
        /// Tool that rejected the input
        tool: String,
        /// Why the input was rejected
        reason: String,
    },

    /// The tool ran and failed
    #[error("Tool '{tool}' failed: {reason}")]
    ExecutionFailed {
        /// Tool that failed
        tool: String,
        /// Failure description
        reason: String,
    },

    /// Anything else a tool implementation wants to surface
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An invocable capability exposed to the step executor
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used in plans and tool calls
    fn name(&self) -> &str;

    /// Human readable description offered to planners and reasoners
    fn description(&self) -> &str;

    /// JSON schema describing the expected input
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// Invoke the tool
    async fn invoke(&self, input: Value) -> Result<String, ToolError>;
}

/// Name, description and input contract of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON schema of the tool input
    pub input_schema: Value,
}

/// Static mapping from tool name to tool
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.register_arc(Arc::new(tool))
    }

    /// Register an already shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!("Tool '{}' registered twice, keeping the latest", name);
        }
        self
    }

    /// Builder-style registration
    pub fn with_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas of every registered tool, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTool;

    #[test]
    fn test_registry_lookup_and_schemas() {
        let registry = ToolRegistry::new()
            .with_tool(MockTool::ok("uniprot_search", "P04637"))
            .with_tool(MockTool::ok("blast", "hits: 3"));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("blast"));
        assert!(!registry.contains("pdb_fetch"));
        assert_eq!(registry.names(), vec!["blast", "uniprot_search"]);

        let schemas = registry.schemas();
        assert_eq!(schemas[0].name, "blast");
        assert_eq!(schemas[1].input_schema["type"], "object");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::ok("blast", "first"));
        registry.register(MockTool::ok("blast", "second"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_through_registry() {
        let registry = ToolRegistry::new().with_tool(MockTool::ok("blast", "hits: 3"));
        let tool = registry.get("blast").unwrap();
        let output = tool.invoke(serde_json::json!({"query": "MEEPQ"})).await.unwrap();
        assert_eq!(output, "hits: 3");
    }
}
