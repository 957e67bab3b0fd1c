//! End-to-end scenarios for the conversation loop.
//!
//! These drive the full pipeline: adapter extraction, batched tool
//! execution, result feedback and trace recording.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use toolweave_agent::{ConversationLoop, TextParsedAdapter};
use toolweave_core::error::{Error, ProviderError};
use toolweave_core::message::{Conversation, Message, MessageToolCall, Role};
use toolweave_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use toolweave_core::schema::{ParamType, ParametersSchema};
use toolweave_core::tool::ToolRegistry;
use toolweave_telemetry::{InMemoryTraceStore, RunType, TraceStore, names};
use toolweave_tools::{FunctionTool, ToolExecutor};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
    repeat_last: bool,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        let responses = self.responses.lock().unwrap();
        let index = if self.repeat_last { 0 } else { count };
        Ok(responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted: call #{count}, have {}", responses.len())))
    }
}

fn text_response(text: &str) -> ProviderResponse {
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

fn tool_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls("", tool_calls),
        ..text_response("")
    }
}

fn call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args.to_string(),
    }
}

fn user(text: &str) -> Conversation {
    let mut conv = Conversation::new();
    conv.push(Message::user(text));
    conv
}

fn echo_tool() -> FunctionTool {
    FunctionTool::new(
        "echo",
        "Echo text back",
        ParametersSchema::new().required("text", ParamType::string(), "Text to echo"),
        |args| Ok(json!(args.str("text").unwrap_or_default())),
    )
}

fn registry(tools: Vec<FunctionTool>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    Arc::new(registry)
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn echo_round_trip_takes_two_model_calls() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![call("call_1", "echo", json!({"text": "hi"}))]),
        text_response("hi"),
    ]));
    let agent = ConversationLoop::new(provider.clone(), ToolExecutor::new(registry(vec![echo_tool()])));

    let mut conv = user("Say hi using the echo tool");
    let outcome = agent.run(&mut conv).await.unwrap();

    assert_eq!(outcome.answer, "hi");
    assert_eq!(provider.calls(), 2);
    assert_eq!(outcome.tool_calls_made, 1);

    let tool_message = &conv.messages[2];
    assert_eq!(tool_message.role, Role::Tool);
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_message.name.as_deref(), Some("echo"));
    assert_eq!(tool_message.content, "hi");
}

#[tokio::test]
async fn unknown_tool_is_reported_back_to_the_model() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![call("call_1", "ghost", json!({}))]),
        text_response("Sorry, I cannot do that."),
    ]));
    let agent = ConversationLoop::new(provider.clone(), ToolExecutor::new(registry(vec![echo_tool()])));

    let mut conv = user("Use the ghost tool");
    let outcome = agent.run(&mut conv).await.unwrap();

    assert_eq!(outcome.answer, "Sorry, I cannot do that.");
    assert!(conv.messages[2].content.contains("tool not found: ghost"));

    // The failure was in the history the model saw next.
    let second = &provider.requests()[1];
    assert!(second.messages.iter().any(|m| m.content.contains("tool not found: ghost")));
}

#[tokio::test]
async fn single_iteration_budget_is_exhausted_by_a_tool_round() {
    let provider = Arc::new(ScriptedProvider::repeating(tool_response(vec![call(
        "call_1",
        "echo",
        json!({"text": "again"}),
    )])));
    let agent = ConversationLoop::new(provider.clone(), ToolExecutor::new(registry(vec![echo_tool()])))
        .with_max_iterations(1);

    let mut conv = user("loop");
    let err = agent.run(&mut conv).await.unwrap_err();

    match err {
        Error::LoopExhausted { max_iterations, transcript } => {
            assert_eq!(max_iterations, 1);
            assert_eq!(transcript.len(), 3);
            assert!(transcript.iter().all(|m| m.role != Role::Assistant || m.has_tool_calls()));
        }
        other => panic!("Expected LoopExhausted, got {other:?}"),
    }
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn results_keep_request_order_when_tools_finish_out_of_order() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let delayed = |name: &'static str, delay_ms: u64| {
        let finished = finished.clone();
        FunctionTool::new_async(name, "Sleeps, then reports its name", ParametersSchema::new(), move |_| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                finished.lock().unwrap().push(name);
                Ok(json!(format!("{name} done")))
            }
        })
    };

    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![call("a", "tool_a", json!({})), call("b", "tool_b", json!({}))]),
        text_response("both done"),
    ]));
    let tools = registry(vec![delayed("tool_a", 300), delayed("tool_b", 10)]);
    let agent = ConversationLoop::new(provider, ToolExecutor::new(tools));

    let mut conv = user("run both");
    agent.run(&mut conv).await.unwrap();

    assert_eq!(*finished.lock().unwrap(), vec!["tool_b", "tool_a"]);
    let results: Vec<&str> = conv
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(results, vec!["tool_a done", "tool_b done"]);
}

#[tokio::test]
async fn text_protocol_round_trip() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        text_response(r#"<tool_call>{"name": "echo", "arguments": {"text": "hi"}}</tool_call>"#),
        text_response("hi"),
    ]));
    let agent = ConversationLoop::new(provider.clone(), ToolExecutor::new(registry(vec![echo_tool()])))
        .with_adapter(Arc::new(TextParsedAdapter::new()));

    let mut conv = user("Say hi");
    let outcome = agent.run(&mut conv).await.unwrap();
    assert_eq!(outcome.answer, "hi");

    let requests = provider.requests();
    assert!(requests[0].tools.is_empty());
    assert_eq!(requests[0].messages[0].role, Role::System);
    assert!(requests[0].messages[0].content.contains("echo"));

    // The result came back as a user message, not a tool message.
    let fed_back = requests[1].messages.last().unwrap();
    assert_eq!(fed_back.role, Role::User);
    assert!(fed_back.content.contains("<tool_result"));
    assert!(conv.messages.iter().all(|m| m.role != Role::Tool));
}

// ── Tracing ──────────────────────────────────────────────────────────────

fn whoami_tool() -> FunctionTool {
    FunctionTool::new_async(
        "whoami",
        "Report the current trace id",
        ParametersSchema::new().injected("trace_id", ParamType::string()),
        |args| async move {
            tokio::task::yield_now().await;
            Ok(json!(args.str("trace_id").unwrap_or_default()))
        },
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conversations_keep_their_own_traces() {
    let store = Arc::new(InMemoryTraceStore::new());
    let tools = registry(vec![whoami_tool()]);

    let make = |session: &str| {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_response(vec![call("w1", "whoami", json!({})), call("w2", "whoami", json!({}))]),
            text_response("done"),
        ]));
        let agent = ConversationLoop::new(provider, ToolExecutor::new(tools.clone())).with_trace_store(store.clone());
        let conv = user("who am i").with_session(session);
        (agent, conv)
    };

    let mut handles = Vec::new();
    for session in ["alpha", "beta", "gamma"] {
        let (agent, mut conv) = make(session);
        handles.push(tokio::spawn(async move {
            let outcome = agent.run(&mut conv).await.unwrap();
            (outcome, conv)
        }));
    }

    let mut trace_ids = Vec::new();
    for handle in handles {
        let (outcome, conv) = handle.await.unwrap();
        for message in conv.messages.iter().filter(|m| m.role == Role::Tool) {
            assert_eq!(message.content, outcome.trace_id);
        }

        let events = store.events_for_trace(&outcome.trace_id).unwrap();
        let session = conv.session_id.clone();
        assert!(events.iter().all(|e| e.session_id == session));

        let chat = events.iter().find(|e| e.event == names::CHAT_START).unwrap();
        assert!(chat.parent_run_id.is_none());
        let llm_runs: Vec<&str> = events
            .iter()
            .filter(|e| e.event == names::LLM_START)
            .map(|e| e.run_id.as_str())
            .collect();
        assert_eq!(llm_runs.len(), 2);
        for tool_start in events.iter().filter(|e| e.event == names::TOOL_START) {
            assert_eq!(tool_start.run_type, RunType::Tool);
            assert_eq!(tool_start.parent_run_id.as_deref(), Some(llm_runs[0]));
        }
        assert_eq!(events.iter().filter(|e| e.event == names::TOOL_END).count(), 2);
        assert!(events.iter().any(|e| e.event == names::CHAT_END && e.duration_ms.is_some()));

        trace_ids.push(outcome.trace_id);
    }

    trace_ids.sort();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 3);
}

#[tokio::test]
async fn failing_trace_store_does_not_abort_the_conversation() {
    struct BrokenStore;

    impl TraceStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }

        fn save(&self, _event: &toolweave_telemetry::TraceEvent) -> Result<(), toolweave_telemetry::TraceStoreError> {
            Err(toolweave_telemetry::TraceStoreError::Poisoned)
        }

        fn events(&self) -> Result<Vec<toolweave_telemetry::TraceEvent>, toolweave_telemetry::TraceStoreError> {
            Ok(Vec::new())
        }
    }

    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![call("call_1", "echo", json!({"text": "still fine"}))]),
        text_response("still fine"),
    ]));
    let agent = ConversationLoop::new(provider, ToolExecutor::new(registry(vec![echo_tool()])))
        .with_trace_store(Arc::new(BrokenStore));

    let mut conv = user("echo");
    let outcome = agent.run(&mut conv).await.unwrap();
    assert_eq!(outcome.answer, "still fine");
}
