use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AttacheError, Result};

/// A named, schema-described callable the model may request.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema for the tool's input, if it takes structured arguments.
    fn parameters(&self) -> Option<Value> {
        None
    }
    async fn call(&self, input: Value) -> Result<Value>;
}

/// Wire-level description of a tool, sent to the model backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Insertion-ordered collection of tools with unique names. Registering a
/// name twice replaces the earlier tool in place, so the descriptor list
/// never contains duplicates and the composition order stays deterministic.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    /// Append every tool from `other`, preserving order and uniqueness.
    pub fn merge(&mut self, other: ToolRegistry) {
        for tool in other.tools {
            self.register_arc(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    pub async fn call(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AttacheError::ToolNotFound(name.to_string()))?;
        tool.call(input).await.map_err(|err| match err {
            err @ AttacheError::ToolExecution { .. } => err,
            other => AttacheError::ToolExecution {
                name: name.to_string(),
                source: Box::new(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn call(&self, _input: Value) -> Result<Value> {
            Ok(json!({ "tool": self.0 }))
        }
    }

    #[test]
    fn keeps_insertion_order() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("alpha"));
        registry.register(NamedTool("beta"));
        registry.register(NamedTool("gamma"));

        assert_eq!(registry.names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn duplicate_names_replace_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("alpha"));
        registry.register(NamedTool("beta"));
        registry.register(NamedTool("alpha"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, AttacheError::ToolNotFound(_)));
    }
}
