//! Tool trait: the abstraction over developer-supplied capabilities.
//!
//! Tools are registered once in a [`ToolRegistry`], which is then shared
//! read-only (behind an `Arc`) by every conversation running concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::schema::{ParametersSchema, ToolArguments, ToolDefinition};

/// A request to execute a tool, as extracted from one model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID within the turn (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as decoded from the wire, before validation
    pub arguments: serde_json::Value,

    /// Set when the arguments could not be decoded at all; the executor
    /// reports it back to the model instead of running the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<String>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            malformed: None,
        }
    }

    /// A call whose argument payload failed to parse.
    pub fn malformed(id: impl Into<String>, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: serde_json::Value::Null,
            malformed: Some(reason.into()),
        }
    }
}

/// The outcome of one tool call. Always produced, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was (or would have been) run
    pub tool_name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The tool's return value on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// The failure message otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock time spent, in milliseconds
    pub duration_ms: u64,
}

impl ToolExecutionResult {
    pub fn success(call_id: impl Into<String>, tool_name: impl Into<String>, output: serde_json::Value, duration: Duration) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: true,
            output: Some(output),
            error: None,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn failure(call_id: impl Into<String>, tool_name: impl Into<String>, error: &ToolError, duration: Duration) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            output: None,
            error: Some(error.to_string()),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// The text fed back to the model for this result.
    ///
    /// Strings are passed through as-is, other JSON values are serialized,
    /// and failures read `Error: <message>` so the model can react to them.
    pub fn content(&self) -> String {
        if !self.success {
            return format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"));
        }
        match &self.output {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// The core Tool trait.
///
/// Implementors declare a typed [`ParametersSchema`]; the executor binds and
/// validates the model's arguments against it before `execute` is called, so
/// a tool body only ever sees well-formed [`ToolArguments`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "echo", "current_date").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// Full parameter schema, including runtime-injected parameters.
    fn parameters(&self) -> ParametersSchema;

    /// Execute the tool with bound arguments.
    async fn execute(&self, arguments: ToolArguments) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into the model-facing [`ToolDefinition`].
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().model_facing(),
        }
    }
}

/// A registry of available tools.
///
/// The loop uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Look up tools when the model requests them
///
/// Names are unique; registration is expected to happen once at startup,
/// after which the registry is only read.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Get all tool definitions (for sending to the model), ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
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
