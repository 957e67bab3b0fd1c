//! Streaming a conversation as text chunks.
//!
//! `run_stream` spawns the loop on the runtime and hands back a
//! [`ResponseStream`]. Text from each model turn is forwarded as soon as it
//! arrives; tool rounds happen between turns without ending the stream.
//! Text that may be the start of a text-encoded tool call is held back until
//! the turn shows whether a call follows.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use toolweave_core::error::{Error, Result};
use toolweave_core::message::{Conversation, Message};
use toolweave_core::provider::{ProviderRequest, Usage};
use tracing::debug;

use crate::loop_runner::{ConversationLoop, LoopOutcome};

const FRAME_BUFFER: usize = 64;

pub(crate) enum Frame {
    Token(String),
    Finished {
        result: Result<LoopOutcome>,
        conversation: Box<Conversation>,
    },
}

/// Where the producer writes visible text.
pub(crate) struct TokenSink(mpsc::Sender<Frame>);

impl TokenSink {
    /// Fails with `Cancelled` once the consumer has gone away.
    pub(crate) async fn send(&self, text: String) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.0.send(Frame::Token(text)).await.map_err(|_| Error::Cancelled)
    }
}

impl ConversationLoop {
    /// Run the conversation on a spawned task, yielding text as it arrives.
    ///
    /// Must be called inside a tokio runtime. The stream ends after the
    /// final answer; a fatal error is yielded once as `Err` and then the
    /// stream ends. Dropping the stream stops the loop.
    pub fn run_stream(&self, mut conversation: Conversation) -> ResponseStream {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let root = self.root_scope(&conversation);
        let trace_id = root.context().trace_id().to_string();
        let this = self.clone();

        let task = tokio::spawn(async move {
            let sink = TokenSink(tx);
            let result = this.supervise(root, &mut conversation, Some(&sink)).await;
            // The consumer may already be gone; nothing is left to tell it.
            let _ = sink
                .0
                .send(Frame::Finished {
                    result,
                    conversation: Box::new(conversation),
                })
                .await;
        });

        ResponseStream {
            frames: ReceiverStream::new(rx),
            task,
            trace_id,
            finished: false,
            outcome: None,
            transcript: None,
        }
    }

    /// One streamed model turn.
    ///
    /// Returns the assembled message, the usage if reported, and text the
    /// marker filter is still holding back.
    pub(crate) async fn stream_model_call(
        &self,
        request: ProviderRequest,
        sink: &TokenSink,
    ) -> Result<(Message, Option<Usage>, String)> {
        let mut chunks = self.provider.stream(request).await?;
        let mut filter = MarkerFilter::new(self.adapter.stream_marker());
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;

        while let Some(chunk) = chunks.recv().await {
            let chunk = chunk?;
            if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
                content.push_str(&delta);
                if let Some(visible) = filter.push(&delta) {
                    sink.send(visible).await?;
                }
            }
            tool_calls.extend(chunk.tool_calls);
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }
        drop(chunks);

        debug!(chars = content.len(), tool_calls = tool_calls.len(), "Streamed model turn complete");
        Ok((Message::assistant_tool_calls(content, tool_calls), usage, filter.into_withheld()))
    }
}

/// Holds back text from the first occurrence of `marker`, including any
/// trailing prefix of it that a later chunk could complete.
struct MarkerFilter<'a> {
    marker: Option<&'a str>,
    pending: String,
    withholding: bool,
}

impl<'a> MarkerFilter<'a> {
    fn new(marker: Option<&'a str>) -> Self {
        Self {
            marker: marker.filter(|m| !m.is_empty()),
            pending: String::new(),
            withholding: false,
        }
    }

    /// Text that is safe to show now.
    fn push(&mut self, delta: &str) -> Option<String> {
        let Some(marker) = self.marker else {
            return Some(delta.to_string());
        };
        self.pending.push_str(delta);
        if self.withholding {
            return None;
        }

        let cut = match self.pending.find(marker) {
            Some(pos) => {
                self.withholding = true;
                pos
            }
            None => self.pending.len() - partial_suffix(&self.pending, marker),
        };
        if cut == 0 {
            return None;
        }
        Some(self.pending.drain(..cut).collect())
    }

    fn into_withheld(self) -> String {
        self.pending
    }
}

/// Length of the longest proper prefix of `marker` that `text` ends with.
fn partial_suffix(text: &str, marker: &str) -> usize {
    marker
        .char_indices()
        .map(|(i, _)| i)
        .skip(1)
        .filter(|&len| text.ends_with(&marker[..len]))
        .max()
        .unwrap_or(0)
}

/// Text chunks of a running conversation.
///
/// Yields `Ok(text)` per visible chunk. After the stream ends,
/// [`outcome`](Self::outcome) and [`transcript`](Self::transcript) describe
/// the finished run. Dropping it aborts the producer task.
pub struct ResponseStream {
    frames: ReceiverStream<Frame>,
    task: JoinHandle<()>,
    trace_id: String,
    finished: bool,
    outcome: Option<LoopOutcome>,
    transcript: Option<Conversation>,
}

impl ResponseStream {
    /// Drain the remaining chunks into one string.
    ///
    /// Once the stream has ended this returns an empty string; it never
    /// replays text that was already consumed.
    pub async fn collect_text(&mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }

    /// Trace id shared by every event of this run.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Set once the run finished with an answer.
    pub fn outcome(&self) -> Option<&LoopOutcome> {
        self.outcome.as_ref()
    }

    /// The conversation after the run, on success or failure.
    pub fn transcript(&self) -> Option<&Conversation> {
        self.transcript.as_ref()
    }

    pub fn into_transcript(mut self) -> Option<Conversation> {
        self.transcript.take()
    }
}

impl Stream for ResponseStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match futures::ready!(this.frames.poll_next_unpin(cx)) {
            Some(Frame::Token(text)) => Poll::Ready(Some(Ok(text))),
            Some(Frame::Finished { result, conversation }) => {
                this.finished = true;
                this.transcript = Some(*conversation);
                match result {
                    Ok(outcome) => {
                        this.outcome = Some(outcome);
                        Poll::Ready(None)
                    }
                    Err(error) => Poll::Ready(Some(Err(error))),
                }
            }
            None => {
                this.finished = true;
                Poll::Ready(Some(Err(Error::Internal(
                    "response producer stopped before finishing".into(),
                ))))
            }
        }
    }
}

impl FusedStream for ResponseStream {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("trace_id", &self.trace_id)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(marker: Option<&str>, deltas: &[&str]) -> (String, String) {
        let mut filter = MarkerFilter::new(marker);
        let shown: String = deltas.iter().filter_map(|d| filter.push(d)).collect();
        (shown, filter.into_withheld())
    }

    #[test]
    fn without_marker_everything_passes() {
        let (shown, held) = feed(None, &["Hel", "lo <tool_call>"]);
        assert_eq!(shown, "Hello <tool_call>");
        assert!(held.is_empty());
    }

    #[test]
    fn text_before_marker_is_shown() {
        let (shown, held) = feed(Some("<tool_call>"), &["Let me check. <tool_call>{\"name\":", "\"now\"}</tool_call>"]);
        assert_eq!(shown, "Let me check. ");
        assert!(held.starts_with("<tool_call>"));
    }

    #[test]
    fn marker_split_across_chunks_is_held() {
        let (shown, held) = feed(Some("<tool_call>"), &["Sure <tool", "_call>{}"]);
        assert_eq!(shown, "Sure ");
        assert_eq!(held, "<tool_call>{}");
    }

    #[test]
    fn near_miss_is_released_later() {
        let (shown, held) = feed(Some("<tool_call>"), &["a <to", "day"]);
        assert_eq!(shown, "a <today");
        assert!(held.is_empty());
    }

    mod loop_streaming {
        use super::super::*;
        use crate::adapter::TextParsedAdapter;
        use crate::test_helpers::*;
        use futures::StreamExt;
        use serde_json::json;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;
        use tokio::sync::{Notify, oneshot};
        use toolweave_core::error::ProviderError;
        use toolweave_core::message::Role;
        use toolweave_core::provider::{ChunkReceiver, Provider, ProviderResponse, StreamChunk};
        use toolweave_core::schema::ParametersSchema;
        use toolweave_core::tool::ToolRegistry;
        use toolweave_tools::{FunctionTool, ToolExecutor};

        fn chunks(parts: &[&str]) -> Vec<StreamChunk> {
            let mut turn: Vec<StreamChunk> = parts.iter().map(|p| StreamChunk::text(*p)).collect();
            turn.push(StreamChunk::done());
            turn
        }

        fn conversation(text: &str) -> Conversation {
            let mut conv = Conversation::new();
            conv.push(Message::user(text));
            conv
        }

        fn agent(provider: ChunkScriptProvider) -> ConversationLoop {
            ConversationLoop::new(Arc::new(provider), ToolExecutor::new(Arc::new(echo_registry())))
        }

        #[tokio::test]
        async fn forwards_chunks_in_order() {
            let agent = agent(ChunkScriptProvider::new(vec![chunks(&["Hel", "lo", " there"])]));
            let mut stream = agent.run_stream(conversation("hi"));

            let mut seen = Vec::new();
            while let Some(chunk) = stream.next().await {
                seen.push(chunk.unwrap());
            }
            assert_eq!(seen, vec!["Hel", "lo", " there"]);
            assert_eq!(stream.outcome().unwrap().answer, "Hello there");
            assert_eq!(stream.transcript().unwrap().messages.len(), 2);
            assert_eq!(stream.outcome().unwrap().trace_id, stream.trace_id());
        }

        #[tokio::test]
        async fn tool_round_happens_between_turns() {
            let mut call_turn = vec![StreamChunk::text("Checking. ")];
            call_turn.push(StreamChunk {
                tool_calls: vec![make_tool_call("echo", json!({"text": "pong"}))],
                done: true,
                ..Default::default()
            });
            let agent = agent(ChunkScriptProvider::new(vec![call_turn, chunks(&["It said ", "pong"])]));

            let mut stream = agent.run_stream(conversation("ping via echo"));
            let text = stream.collect_text().await.unwrap();
            assert_eq!(text, "Checking. It said pong");

            let outcome = stream.outcome().unwrap();
            assert_eq!(outcome.iterations, 2);
            assert_eq!(outcome.tool_calls_made, 1);
            let roles: Vec<Role> = stream.transcript().unwrap().messages.iter().map(|m| m.role).collect();
            assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        }

        #[tokio::test]
        async fn text_encoded_calls_are_not_shown() {
            let agent = agent(ChunkScriptProvider::new(vec![
                chunks(&["One moment. <tool", "_call>{\"name\": \"echo\", ", "\"arguments\": {\"text\": \"x\"}}</tool_call>"]),
                chunks(&["Done: x"]),
            ]))
            .with_adapter(Arc::new(TextParsedAdapter::new()));

            let mut stream = agent.run_stream(conversation("echo x"));
            let text = stream.collect_text().await.unwrap();
            assert_eq!(text, "One moment. Done: x");
            assert_eq!(stream.outcome().unwrap().tool_calls_made, 1);
        }

        #[tokio::test]
        async fn drained_stream_yields_nothing_more() {
            let agent = agent(ChunkScriptProvider::new(vec![chunks(&["only once"])]));
            let mut stream = agent.run_stream(conversation("hi"));
            assert_eq!(stream.collect_text().await.unwrap(), "only once");
            assert_eq!(stream.collect_text().await.unwrap(), "");
            assert!(stream.is_terminated());
        }

        /// Sends one chunk, then waits for the receiver to go away.
        struct HangingStream {
            released: std::sync::Mutex<Option<oneshot::Sender<()>>>,
        }

        #[async_trait::async_trait]
        impl Provider for HangingStream {
            fn name(&self) -> &str {
                "hanging_stream"
            }

            async fn complete(&self, _request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError> {
                Err(ProviderError::Network("streaming only".into()))
            }

            async fn stream(&self, _request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
                let released = self.released.lock().unwrap().take();
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    if tx.send(Ok(StreamChunk::text("first"))).await.is_ok() {
                        tx.closed().await;
                    }
                    if let Some(released) = released {
                        let _ = released.send(());
                    }
                });
                Ok(rx)
            }
        }

        struct SetOnDrop(Arc<AtomicBool>);

        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        #[tokio::test]
        async fn dropping_the_stream_releases_the_provider() {
            let (released_tx, released_rx) = oneshot::channel();
            let provider = HangingStream {
                released: std::sync::Mutex::new(Some(released_tx)),
            };
            let agent = ConversationLoop::new(Arc::new(provider), ToolExecutor::new(Arc::new(echo_registry())));

            let mut stream = agent.run_stream(conversation("hi"));
            assert_eq!(stream.next().await.unwrap().unwrap(), "first");
            drop(stream);

            tokio::time::timeout(Duration::from_secs(5), released_rx)
                .await
                .expect("provider task still waiting")
                .unwrap();
        }

        #[tokio::test]
        async fn dropping_the_stream_cancels_a_running_tool() {
            let started = Arc::new(Notify::new());
            let dropped = Arc::new(AtomicBool::new(false));

            let mut registry = ToolRegistry::new();
            let (tool_started, tool_dropped) = (started.clone(), dropped.clone());
            registry
                .register(FunctionTool::new_async("hang", "Never returns", ParametersSchema::new(), move |_args| {
                    let guard = SetOnDrop(tool_dropped.clone());
                    let started = tool_started.clone();
                    async move {
                        let _guard = guard;
                        started.notify_one();
                        std::future::pending().await
                    }
                }))
                .unwrap();

            let call_turn = vec![StreamChunk {
                tool_calls: vec![make_tool_call("hang", json!({}))],
                done: true,
                ..Default::default()
            }];
            let provider = ChunkScriptProvider::new(vec![call_turn, chunks(&["unreachable"])]);
            let agent = ConversationLoop::new(Arc::new(provider), ToolExecutor::new(Arc::new(registry)));

            let stream = agent.run_stream(conversation("hang"));
            tokio::time::timeout(Duration::from_secs(5), started.notified())
                .await
                .expect("tool never started");
            assert!(!dropped.load(Ordering::SeqCst));
            drop(stream);

            tokio::time::timeout(Duration::from_secs(5), async {
                while !dropped.load(Ordering::SeqCst) {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .expect("tool body was not dropped");
        }

        #[tokio::test]
        async fn fatal_error_is_yielded_once() {
            let agent = agent(ChunkScriptProvider::new(vec![]));
            let mut stream = agent.run_stream(conversation("hi"));

            let first = stream.next().await.unwrap();
            assert!(matches!(first, Err(Error::Provider(_))));
            assert!(stream.next().await.is_none());
            assert!(stream.outcome().is_none());
            assert_eq!(stream.transcript().unwrap().messages.len(), 1);
        }
    }

    #[test]
    fn partial_suffix_lengths() {
        assert_eq!(partial_suffix("abc <tool", "<tool_call>"), 5);
        assert_eq!(partial_suffix("abc", "<tool_call>"), 0);
        assert_eq!(partial_suffix("abc <", "<tool_call>"), 1);
    }
}
