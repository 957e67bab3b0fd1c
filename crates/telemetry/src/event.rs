//! Persisted trace records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{RunType, TraceContext};

/// Well-known event names.
pub mod names {
    pub const CHAT_START: &str = "chat.start";
    pub const CHAT_END: &str = "chat.end";
    pub const LLM_START: &str = "llm.start";
    pub const LLM_END: &str = "llm.end";
    pub const TOOL_START: &str = "tool.start";
    pub const TOOL_END: &str = "tool.end";
    pub const TOOL_LOG: &str = "tool.log";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Success,
    Error,
    Info,
}

/// One line in a trace store.
///
/// Carries the full identity of the context it was recorded under, so events
/// from concurrent conversations can be separated by `trace_id` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub session_id: Option<String>,
    pub run_type: RunType,
    pub operation: String,
    pub event: String,
    pub status: EventStatus,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl TraceEvent {
    pub fn new(context: &TraceContext, event: impl Into<String>, status: EventStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            trace_id: context.trace_id().to_string(),
            run_id: context.run_id().to_string(),
            parent_run_id: context.parent_run_id().map(str::to_string),
            session_id: context.session_id().map(str::to_string),
            run_type: context.run_type(),
            operation: context.operation().to_string(),
            event: event.into(),
            status,
            inputs: Value::Null,
            outputs: Value::Null,
            duration_ms: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
