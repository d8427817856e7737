//! Tool registry - holds the tools the agent may call

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use crate::Result;
use crate::error::Error;
use super::Tool;

/// Tool definition for LLM.
///
/// This flat shape is the only one used inside the crate. Registered tools
/// produce it directly through [`Tool::to_definition`]; declarations arriving
/// as JSON, in either shape, go through [`ToolDefinition::from_value`], which
/// also backs `Deserialize`. The wire shape comes from [`ToolDefinition::to_wire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Normalize a JSON tool declaration.
    ///
    /// Accepts `{name, description, parameters}` as well as
    /// `{type: "function", function: {name, description, parameters}}`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let body = value.get("function").unwrap_or(value);

        let name = body.get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Tool(format!("Tool declaration has no name: {}", value)))?;

        Ok(Self {
            name: name.to_string(),
            description: body.get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parameters: body.get("parameters")
                .cloned()
                .unwrap_or_else(|| json!({})),
        })
    }

    /// Shape expected by chat-completion APIs
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

impl TryFrom<Value> for ToolDefinition {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(&value)
    }
}

/// Tool registry maps tool names to implementations.
///
/// Read-only once the agent is built, so it is shared freely between
/// concurrent conversations.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    /// Look a tool up by name
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get tool definitions for LLM, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values()
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, params: Value) -> Result<String> {
        let tool = self.get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        tool.execute(params).await
    }

    /// Check if a tool exists
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List registered tool names
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::DummyTool;

    #[tokio::test]
    async fn test_registry_register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("test_tool", "success"));

        assert!(registry.has("test_tool"));
        assert_eq!(registry.tool_names(), vec!["test_tool"]);

        let result = registry.execute("test_tool", json!({})).await.unwrap();
        assert_eq!(result, "success");
    }

    #[tokio::test]
    async fn test_registry_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(registry.get("unknown").is_none());
        assert!(registry.execute("unknown", json!({})).await.is_err());
    }

    #[test]
    fn test_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("zeta", ""));
        registry.register(DummyTool::new("alpha", ""));

        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_definition_from_flat_shape() {
        let def = ToolDefinition::from_value(&json!({
            "name": "search",
            "description": "Find things",
            "parameters": {"type": "object"}
        })).unwrap();

        assert_eq!(def.name, "search");
        assert_eq!(def.description, "Find things");
        assert_eq!(def.parameters, json!({"type": "object"}));
    }

    #[test]
    fn test_definition_from_nested_shape() {
        let def = ToolDefinition::from_value(&json!({
            "type": "function",
            "function": {"name": "search", "description": "Find things"}
        })).unwrap();

        assert_eq!(def.name, "search");
        assert_eq!(def.parameters, json!({}));
    }

    #[test]
    fn test_definition_without_name_is_rejected() {
        assert!(ToolDefinition::from_value(&json!({"description": "nameless"})).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let def = ToolDefinition {
            name: "search".into(),
            description: "Find things".into(),
            parameters: json!({"type": "object"}),
        };
        let wire = def.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "search");
        assert_eq!(ToolDefinition::from_value(&wire).unwrap(), def);
    }

    #[test]
    fn test_deserialize_normalizes_both_shapes() {
        let defs: Vec<ToolDefinition> = serde_json::from_value(json!([
            {"name": "flat", "description": "a"},
            {"type": "function", "function": {"name": "nested", "parameters": {"type": "object"}}}
        ])).unwrap();

        assert_eq!(defs[0].name, "flat");
        assert_eq!(defs[1].name, "nested");
        assert_eq!(defs[1].parameters, json!({"type": "object"}));

        assert!(serde_json::from_value::<ToolDefinition>(json!({"function": {}})).is_err());
    }
}
