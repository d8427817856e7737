//! Tools module - agent capabilities
//!
//! Tools are external actions the agent can take. The assistant ships with a
//! single one, web search, but the registry does not care how many exist.

mod runner;
pub mod web;

pub use runner::{ToolDefinition, ToolRegistry};
pub use web::{SearchHit, SearchProvider, SearchResponse, TavilyClient, WebSearchTool};

use async_trait::async_trait;
use serde_json::Value;
use crate::Result;

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters.
    ///
    /// `params` is whatever the model sent: parsed JSON when the arguments
    /// were valid JSON, otherwise the raw argument text as a JSON string.
    async fn execute(&self, params: Value) -> Result<String>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Dummy tool for testing. Records every argument it is called with.
#[cfg(test)]
pub struct DummyTool {
    pub name: String,
    pub result: std::result::Result<String, String>,
    pub seen: std::sync::Arc<std::sync::Mutex<Vec<Value>>>,
}

#[cfg(test)]
impl DummyTool {
    pub fn new(name: &str, result: &str) -> Self {
        Self {
            name: name.to_string(),
            result: Ok(result.to_string()),
            seen: Default::default(),
        }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            name: name.to_string(),
            result: Err(error.to_string()),
            seen: Default::default(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str { &self.name }
    fn description(&self) -> &str { "Dummy tool for testing" }
    fn parameters(&self) -> Value { serde_json::json!({"type": "object"}) }

    async fn execute(&self, params: Value) -> Result<String> {
        self.seen.lock().unwrap().push(params);
        self.result
            .clone()
            .map_err(crate::error::Error::Tool)
    }
}
