//! Adapter for backends with native function calling.

use std::collections::HashSet;

use serde_json::Value;
use toolweave_core::message::{Message, MessageToolCall};
use toolweave_core::provider::ProviderRequest;
use toolweave_core::schema::{ToolDefinition, json_type_name};
use toolweave_core::tool::{ToolCallRequest, ToolExecutionResult};
use tracing::warn;

use super::{AdapterError, ToolCallAdapter};

/// Reads `tool_calls` from the provider response and answers with
/// `role: tool` messages keyed by call id.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredAdapter;

impl StructuredAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Ids the model left empty or repeated, made unique within the turn.
    fn normalized_ids(calls: &[MessageToolCall]) -> Vec<String> {
        let mut seen = HashSet::new();
        calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let base = if call.id.trim().is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    call.id.clone()
                };
                let mut id = base.clone();
                let mut n = 1;
                while !seen.insert(id.clone()) {
                    n += 1;
                    id = format!("{base}_{n}");
                }
                if id != call.id {
                    warn!(tool = %call.name, original = %call.id, id = %id, index = i, "Rewrote tool call id");
                }
                id
            })
            .collect()
    }

    fn parse_arguments(id: String, call: &MessageToolCall) -> ToolCallRequest {
        let raw = call.arguments.trim();
        if raw.is_empty() {
            return ToolCallRequest::new(id, &call.name, Value::Object(Default::default()));
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ (Value::Object(_) | Value::Null)) => ToolCallRequest::new(id, &call.name, value),
            Ok(other) => ToolCallRequest::malformed(
                id,
                &call.name,
                format!("arguments must be a JSON object, got {}", json_type_name(&other)),
            ),
            Err(e) => ToolCallRequest::malformed(id, &call.name, format!("arguments are not valid JSON: {e}")),
        }
    }
}

impl ToolCallAdapter for StructuredAdapter {
    fn name(&self) -> &str {
        "structured"
    }

    fn prepare(&self, request: &mut ProviderRequest, tools: &[ToolDefinition]) {
        request.tools = tools.to_vec();
    }

    fn extract(&self, message: &Message) -> Result<Vec<ToolCallRequest>, AdapterError> {
        let ids = Self::normalized_ids(&message.tool_calls);
        Ok(ids
            .into_iter()
            .zip(&message.tool_calls)
            .map(|(id, call)| Self::parse_arguments(id, call))
            .collect())
    }

    fn assistant_message(&self, response: &Message, calls: &[ToolCallRequest]) -> Message {
        // Raw descriptors go back verbatim; only the ids follow the requests.
        let echoed = response
            .tool_calls
            .iter()
            .zip(calls)
            .map(|(raw, call)| MessageToolCall {
                id: call.id.clone(),
                name: raw.name.clone(),
                arguments: raw.arguments.clone(),
            })
            .collect();
        Message::assistant_tool_calls(response.content.clone(), echoed)
    }

    fn result_messages(&self, calls: &[ToolCallRequest], results: &[ToolExecutionResult]) -> Vec<Message> {
        calls
            .iter()
            .zip(results)
            .map(|(call, result)| Message::tool_result(&call.id, &call.name, result.content()))
            .collect()
    }
}
