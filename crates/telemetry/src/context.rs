//! Hierarchical correlation identity for one request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// The kind of work a run represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// Top-level conversation turn.
    Chat,
    /// One model call.
    Llm,
    /// One tool execution.
    Tool,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Llm => "llm",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable trace context.
///
/// Every context in a trace descends from exactly one root made with
/// [`create_root`](Self::create_root). Children share the root's `trace_id`
/// and `session_id` and point at their parent through `parent_run_id`.
/// Fields are private; a context cannot be changed once it has been handed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    trace_id: String,
    run_id: String,
    parent_run_id: Option<String>,
    session_id: Option<String>,
    operation: String,
    run_type: RunType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Value>,
}

impl TraceContext {
    /// Start a new trace at the top of a request.
    pub fn create_root(run_type: RunType, operation: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            run_id: Uuid::new_v4().to_string(),
            parent_run_id: None,
            session_id,
            operation: operation.into(),
            run_type,
            metadata: BTreeMap::new(),
        }
    }

    /// Derive a nested run within the same trace.
    pub fn create_child(&self, run_type: RunType, operation: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            run_id: Uuid::new_v4().to_string(),
            parent_run_id: Some(self.run_id.clone()),
            session_id: self.session_id.clone(),
            operation: operation.into(),
            run_type,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach metadata while building a context, before it is shared.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn parent_run_id(&self) -> Option<&str> {
        self.parent_run_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn run_type(&self) -> RunType {
        self.run_type
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn is_root(&self) -> bool {
        self.parent_run_id.is_none()
    }

    /// Values a tool may declare as injected parameters.
    pub fn injected_values(&self) -> Map<String, Value> {
        let mut values = Map::new();
        values.insert("trace_id".into(), json!(self.trace_id));
        values.insert("run_id".into(), json!(self.run_id));
        if let Some(session) = &self.session_id {
            values.insert("session_id".into(), json!(session));
        }
        values
    }
}
