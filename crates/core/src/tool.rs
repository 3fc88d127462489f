//! Tool trait: the abstraction over capabilities the model may invoke.
//!
//! Tools are looked up by name in an explicitly constructed [`ToolRegistry`];
//! adding a capability means registering one more entry. Each tool receives a
//! caller-supplied context (a brokerage session, a job coordinator, `()`),
//! which the registry hands through without inspecting.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use crate::error::ToolError;

/// How a tool is described to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The tool name (unique within a registry)
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

/// A tool invocation parsed from model output.
///
/// Arguments are not validated against the schema here; each tool checks
/// its own required and typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub name: String,

    /// Raw argument mapping
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The tool that produced this result
    pub name: String,

    /// Structured output, already in JSON form
    #[serde(default)]
    pub data: Value,

    /// Human-readable summary
    #[serde(default)]
    pub message: String,
}

impl ToolResult {
    /// A successful result carrying already-structured data.
    pub fn new(name: impl Into<String>, data: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            name: name.into(),
            data,
            message: message.into(),
        }
    }

    /// A successful result built from any serializable value.
    ///
    /// Nested records and lists become JSON objects and arrays, `chrono`
    /// timestamps become ISO-8601 strings and numeric types become JSON numbers.
    pub fn from_serialize<T: Serialize>(
        name: impl Into<String>,
        data: &T,
        message: impl Into<String>,
    ) -> Result<Self, ToolError> {
        let name = name.into();
        let data = serde_json::to_value(data).map_err(|e| ToolError::ExecutionFailed {
            tool_name: name.clone(),
            reason: format!("result is not serializable: {e}"),
        })?;
        Ok(Self::new(name, data, message))
    }

    /// The envelope placed into a `tool` message for the model.
    pub fn to_model_value(&self) -> Value {
        json!({
            "tool": self.name,
            "success": self.success,
            "message": self.message,
            "data": self.data,
        })
    }
}

/// The envelope placed into a `tool` message when a tool fails.
pub fn failure_payload(name: &str, error: &str) -> Value {
    json!({
        "tool": name,
        "success": false,
        "error": error,
    })
}

/// The core Tool trait.
///
/// `C` is the caller's context type; tools that need nothing from the caller
/// implement `Tool<C>` for every `C`.
#[async_trait]
pub trait Tool<C: Send + Sync = ()>: Send + Sync {
    /// The unique name of this tool (e.g., "quote", "start_job").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        context: &C,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError>;

    /// Convert this tool into the spec sent to the model.
    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ToolHandler<C> = dyn Fn(&C, &Map<String, Value>) -> Result<ToolResult, ToolError> + Send + Sync;

/// A tool backed by a synchronous closure.
pub struct FnTool<C> {
    spec: ToolSpec,
    handler: Box<ToolHandler<C>>,
}

impl<C> FnTool<C> {
    pub fn new<F>(spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(&C, &Map<String, Value>) -> Result<ToolResult, ToolError> + Send + Sync + 'static,
    {
        Self {
            spec,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl<C: Send + Sync> Tool<C> for FnTool<C> {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec.parameters.clone()
    }

    async fn execute(
        &self,
        context: &C,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        (self.handler)(context, arguments)
    }

    fn to_spec(&self) -> ToolSpec {
        self.spec.clone()
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Describe tools to the model, in registration order
/// 2. Look up and execute tools when the model requests them
pub struct ToolRegistry<C: Send + Sync = ()> {
    tools: Vec<Box<dyn Tool<C>>>,
    index: HashMap<String, usize>,
}

impl<C: Send + Sync> ToolRegistry<C> {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name,
    /// keeping its original position.
    pub fn register(&mut self, tool: Box<dyn Tool<C>>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool<C>> {
        self.index.get(name).map(|&slot| self.tools[slot].as_ref())
    }

    /// All tool specs, in registration order.
    pub fn describe(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.to_spec()).collect()
    }

    /// Execute a tool by name with the raw argument mapping.
    pub async fn invoke(
        &self,
        context: &C,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(context, arguments).await
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl<C: Send + Sync> Default for ToolRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
