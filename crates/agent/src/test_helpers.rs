//! Shared test helpers for the loop and its adapters.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use toolweave_core::error::ProviderError;
use toolweave_core::message::{Message, MessageToolCall};
use toolweave_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use toolweave_core::schema::{ParamType, ParametersSchema};
use toolweave_core::tool::ToolRegistry;
use toolweave_tools::FunctionTool;

/// A mock provider that returns scripted responses in sequence and keeps
/// every request it received.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    repeat_last: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// Create a provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, thought: &str, answer: &str) -> Self {
        Self::new(vec![make_tool_call_response(tool_calls, thought), make_text_response(answer)])
    }

    /// A provider that requests the same tool on every call.
    pub fn always_calling(name: &str, args: serde_json::Value) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![make_tool_call_response(vec![make_tool_call(name, args)], "")])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        let responses = self.responses.lock().unwrap();
        let index = if self.repeat_last { count.min(responses.len().saturating_sub(1)) } else { count };
        responses.get(index).cloned().ok_or_else(|| ProviderError::ApiError {
            status_code: 500,
            message: format!("no scripted response for call #{count}"),
        })
    }
}

/// Sleeps before every answer.
pub struct SlowProvider {
    delay: Duration,
    text: String,
}

impl SlowProvider {
    pub fn new(delay: Duration, text: &str) -> Self {
        Self {
            delay,
            text: text.into(),
        }
    }
}

#[async_trait::async_trait]
impl Provider for SlowProvider {
    fn name(&self) -> &str {
        "slow_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(self.delay).await;
        Ok(make_text_response(&self.text))
    }
}

/// Streams scripted chunks, one script per model call.
pub struct ChunkScriptProvider {
    turns: Mutex<Vec<Vec<StreamChunk>>>,
}

impl ChunkScriptProvider {
    pub fn new(turns: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().rev().collect()),
        }
    }
}

#[async_trait::async_trait]
impl Provider for ChunkScriptProvider {
    fn name(&self) -> &str {
        "chunk_script"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("streaming only".into()))
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| ProviderError::StreamInterrupted("no scripted turn".into()))?;
        let (tx, rx) = mpsc::channel(turn.len().max(1));
        for chunk in turn {
            tx.send(Ok(chunk)).await.unwrap();
        }
        Ok(rx)
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls(thought, tool_calls),
        ..make_text_response(thought)
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// A registry holding one `echo` tool.
pub fn echo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(FunctionTool::new(
            "echo",
            "Echo text back",
            ParametersSchema::new().required("text", ParamType::string(), "Text to echo"),
            |args| Ok(json!(args.str("text").unwrap_or_default())),
        ))
        .unwrap();
    registry
}
