//! The conversation loop controller.
//!
//! Each iteration calls the model with the full history, asks the adapter
//! for tool calls, and either returns the answer or runs one tool round
//! and loops:
//!
//! ```text
//! AwaitingModel ──no calls──▶ answer
//!      │ calls
//!      ▼
//! ExecutingTools ──▶ AppendingResults ──▶ AwaitingModel
//! ```
//!
//! Running out of iterations before an answer is an error carrying the
//! transcript, never a silent stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use toolweave_core::error::{Error, Result, TimeoutScope};
use toolweave_core::event::{MetricsRecorder, NoopMetrics};
use toolweave_core::message::{Conversation, Message, Role};
use toolweave_core::provider::{Provider, ProviderRequest, Usage};
use toolweave_core::schema::ToolDefinition;
use toolweave_telemetry::propagation::{self, RunTimer, TraceScope};
use toolweave_telemetry::{EventStatus, RunType, TraceContext, TraceStore};
use toolweave_tools::ToolExecutor;
use tracing::{debug, info, warn};

use crate::adapter::{StructuredAdapter, ToolCallAdapter};
use crate::stream::TokenSink;

/// Model parameters and limits for one loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Model calls allowed per `run`.
    pub max_iterations: u32,
    /// Limit on one model call plus its tool round.
    pub iteration_timeout: Option<Duration>,
    /// Limit on a whole `run`.
    pub conversation_timeout: Option<Duration>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            model: "default".into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 5,
            iteration_timeout: None,
            conversation_timeout: None,
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub answer: String,
    /// Iterations used, which is also the number of model calls made.
    pub iterations: u32,
    pub tool_calls_made: usize,
    pub trace_id: String,
}

impl LoopOutcome {
    pub fn model_calls(&self) -> u32 {
        self.iterations
    }
}

pub(crate) enum Step {
    Answer(String),
    ToolRound { calls: usize },
}

#[derive(Default)]
struct Progress {
    iterations: u32,
    tool_calls_made: usize,
}

/// Drives a conversation until the model answers without requesting tools.
///
/// Cheap to clone; clones share the provider, adapter, executor and store.
/// One instance can serve many conversations concurrently.
#[derive(Clone)]
pub struct ConversationLoop {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) adapter: Arc<dyn ToolCallAdapter>,
    pub(crate) executor: ToolExecutor,
    pub(crate) store: Option<Arc<dyn TraceStore>>,
    pub(crate) metrics: Arc<dyn MetricsRecorder>,
    pub(crate) settings: LoopSettings,
}

impl ConversationLoop {
    /// A loop using the structured adapter and default settings.
    pub fn new(provider: Arc<dyn Provider>, executor: ToolExecutor) -> Self {
        Self {
            provider,
            adapter: Arc::new(StructuredAdapter::new()),
            executor,
            store: None,
            metrics: Arc::new(NoopMetrics),
            settings: LoopSettings::default(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ToolCallAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Persist trace events for every run to `store`.
    pub fn with_trace_store(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Report `conversation`, `model_call` and `tool:<name>` timings.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.executor = self.executor.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = LoopSettings {
            max_iterations: settings.max_iterations.max(1),
            ..settings
        };
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = model.into();
        self
    }

    /// Set the maximum number of model calls per run (at least 1).
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.settings.max_iterations = max.max(1);
        self
    }

    pub fn with_iteration_timeout(mut self, limit: Duration) -> Self {
        self.settings.iteration_timeout = Some(limit);
        self
    }

    pub fn with_conversation_timeout(mut self, limit: Duration) -> Self {
        self.settings.conversation_timeout = Some(limit);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn adapter(&self) -> &Arc<dyn ToolCallAdapter> {
        &self.adapter
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Run the conversation to a final answer.
    ///
    /// Appends every assistant, tool-call and tool-result message to
    /// `conversation`. On a fatal error the messages gathered so far stay
    /// in `conversation` and are also attached to the error.
    pub async fn run(&self, conversation: &mut Conversation) -> Result<LoopOutcome> {
        self.supervise(self.root_scope(conversation), conversation, None).await
    }

    /// A fresh root trace for one run.
    pub(crate) fn root_scope(&self, conversation: &Conversation) -> TraceScope {
        let context = TraceContext::create_root(RunType::Chat, "conversation", conversation.session_id.clone())
            .with_metadata("conversation_id", conversation.id.to_string())
            .with_metadata("model", self.settings.model.clone())
            .with_metadata("adapter", self.adapter.name());
        TraceScope::new(context, self.store.clone())
    }

    /// Everything around the iterations: the root scope, the conversation
    /// timeout, the `chat` run events and the `conversation` metric.
    pub(crate) async fn supervise(
        &self,
        root: TraceScope,
        conversation: &mut Conversation,
        sink: Option<&TokenSink>,
    ) -> Result<LoopOutcome> {
        let trace_id = root.context().trace_id().to_string();
        info!(
            conversation_id = %conversation.id,
            trace_id = %trace_id,
            messages = conversation.messages.len(),
            streaming = sink.is_some(),
            "Processing conversation"
        );

        let timer = root.start_run(json!({
            "conversation_id": conversation.id.to_string(),
            "messages": conversation.messages.len(),
            "input": last_user_text(conversation),
        }));

        let result = root
            .scope(async {
                match bounded(self.settings.conversation_timeout, self.drive(conversation, sink)).await {
                    Ok(result) => result,
                    Err(limit) => Err(timeout_error(TimeoutScope::Conversation, limit, conversation)),
                }
            })
            .await;

        match result {
            Ok((answer, progress)) => {
                let elapsed = timer.finish(
                    EventStatus::Success,
                    json!({
                        "answer": answer,
                        "iterations": progress.iterations,
                        "tool_calls": progress.tool_calls_made,
                    }),
                );
                self.metrics.record_success("conversation", elapsed);
                info!(
                    conversation_id = %conversation.id,
                    iterations = progress.iterations,
                    tool_calls = progress.tool_calls_made,
                    duration_ms = elapsed.as_millis() as u64,
                    "Conversation complete"
                );
                Ok(LoopOutcome {
                    answer,
                    iterations: progress.iterations,
                    tool_calls_made: progress.tool_calls_made,
                    trace_id,
                })
            }
            Err(error) => {
                let elapsed = timer.finish(EventStatus::Error, json!({ "error": error.to_string() }));
                self.metrics.record_error("conversation", &error.to_string(), elapsed);
                warn!(conversation_id = %conversation.id, error = %error, "Conversation failed");
                Err(error)
            }
        }
    }

    async fn drive(&self, conversation: &mut Conversation, sink: Option<&TokenSink>) -> Result<(String, Progress)> {
        let definitions = self.executor.definitions();
        let mut progress = Progress::default();

        loop {
            if progress.iterations >= self.settings.max_iterations {
                warn!(
                    conversation_id = %conversation.id,
                    max_iterations = self.settings.max_iterations,
                    "Max iterations reached without a final answer"
                );
                return Err(Error::LoopExhausted {
                    max_iterations: self.settings.max_iterations,
                    transcript: conversation.messages.clone(),
                });
            }
            progress.iterations += 1;
            debug!(conversation_id = %conversation.id, iteration = progress.iterations, "Conversation loop iteration");

            let iteration = self.iterate(conversation, &definitions, progress.iterations, sink);
            let step = match bounded(self.settings.iteration_timeout, iteration).await {
                Ok(step) => step?,
                Err(limit) => return Err(timeout_error(TimeoutScope::Iteration, limit, conversation)),
            };

            match step {
                Step::Answer(answer) => return Ok((answer, progress)),
                Step::ToolRound { calls } => progress.tool_calls_made += calls,
            }
        }
    }

    /// One model call and, if requested, one tool round.
    ///
    /// Nothing is appended to `conversation` until the round is complete,
    /// so a timed-out iteration leaves no half-written turn behind.
    async fn iterate(
        &self,
        conversation: &mut Conversation,
        definitions: &[ToolDefinition],
        iteration: u32,
        sink: Option<&TokenSink>,
    ) -> Result<Step> {
        let llm = match propagation::current() {
            Some(parent) => parent.child(RunType::Llm, "model_call"),
            None => TraceScope::new(
                TraceContext::create_root(RunType::Llm, "model_call", conversation.session_id.clone()),
                self.store.clone(),
            ),
        };

        let mut request = ProviderRequest::new(self.settings.model.clone(), conversation.messages.clone());
        request.temperature = self.settings.temperature;
        request.max_tokens = self.settings.max_tokens;
        request.stream = sink.is_some();
        self.adapter.prepare(&mut request, definitions);

        let timer = llm.start_run(json!({
            "iteration": iteration,
            "messages": request.messages.len(),
            "tools": definitions.len(),
            "stream": request.stream,
        }));

        let (message, withheld) = match sink {
            Some(sink) => {
                let streamed = llm.clone().scope(self.stream_model_call(request, sink)).await;
                match streamed {
                    Ok((message, usage, withheld)) => {
                        self.model_call_succeeded(timer, &message, usage);
                        (message, withheld)
                    }
                    Err(error) => {
                        self.model_call_failed(timer, &error.to_string());
                        return Err(error);
                    }
                }
            }
            None => match llm.clone().scope(self.provider.complete(request)).await {
                Ok(response) => {
                    self.model_call_succeeded(timer, &response.message, response.usage);
                    (response.message, String::new())
                }
                Err(error) => {
                    self.model_call_failed(timer, &error.to_string());
                    return Err(error.into());
                }
            },
        };

        let calls = self.adapter.extract(&message).map_err(|e| Error::Adapter {
            reason: e.to_string(),
            transcript: conversation.messages.clone(),
        })?;

        if calls.is_empty() {
            if let Some(sink) = sink {
                sink.send(withheld).await?;
            }
            let answer = message.content.clone();
            conversation.push(message);
            return Ok(Step::Answer(answer));
        }

        debug!(
            tool_count = calls.len(),
            tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Executing tool calls"
        );
        let results = llm.scope(self.executor.execute_batch(&calls)).await;

        conversation.push(self.adapter.assistant_message(&message, &calls));
        conversation.extend(self.adapter.result_messages(&calls, &results));
        Ok(Step::ToolRound { calls: calls.len() })
    }

    fn model_call_succeeded(&self, timer: RunTimer, message: &Message, usage: Option<Usage>) {
        let elapsed = timer.finish(
            EventStatus::Success,
            json!({
                "content": message.content,
                "tool_calls": message.tool_calls.len(),
                "usage": usage,
            }),
        );
        self.metrics.record_success("model_call", elapsed);
    }

    fn model_call_failed(&self, timer: RunTimer, error: &str) {
        let elapsed = timer.finish(EventStatus::Error, json!({ "error": error }));
        self.metrics.record_error("model_call", error, elapsed);
        warn!(provider = self.provider.name(), error = %error, "Model call failed");
    }
}

impl std::fmt::Debug for ConversationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLoop")
            .field("provider", &self.provider.name())
            .field("adapter", &self.adapter.name())
            .field("executor", &self.executor)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Run `fut` under an optional limit; `Err` carries the limit that elapsed.
async fn bounded<T>(limit: Option<Duration>, fut: impl Future<Output = T>) -> std::result::Result<T, Duration> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
        None => Ok(fut.await),
    }
}

fn timeout_error(scope: TimeoutScope, limit: Duration, conversation: &Conversation) -> Error {
    warn!(conversation_id = %conversation.id, %scope, limit_ms = limit.as_millis() as u64, "Timed out");
    Error::Timeout {
        scope,
        limit_ms: limit.as_millis() as u64,
        transcript: conversation.messages.clone(),
    }
}

fn last_user_text(conversation: &Conversation) -> Option<&str> {
    conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}
