//! Tool-call protocol adapters.
//!
//! Backends disagree on how a model asks for a tool. Some return structured
//! `tool_calls` next to the text; others only produce text, in which the
//! request has to be found. An adapter turns either shape into canonical
//! [`ToolCallRequest`]s and builds the messages that carry results back.

mod structured;
mod text;

pub use structured::StructuredAdapter;
pub use text::{ParsedCall, TaggedJsonGrammar, TextParsedAdapter, ToolCallGrammar};

use toolweave_core::message::Message;
use toolweave_core::provider::ProviderRequest;
use toolweave_core::schema::ToolDefinition;
use toolweave_core::tool::{ToolCallRequest, ToolExecutionResult};

/// A turn the adapter could not interpret at all.
///
/// Neither bundled adapter produces one; malformed calls are reported back
/// to the model instead.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct AdapterError(pub String);

pub trait ToolCallAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Make the tool schemas available to the model for this request.
    fn prepare(&self, request: &mut ProviderRequest, tools: &[ToolDefinition]);

    /// Tool calls requested by an assistant message. Empty means the
    /// message is a final answer.
    fn extract(&self, message: &Message) -> Result<Vec<ToolCallRequest>, AdapterError>;

    /// The assistant message to record for a turn that requested `calls`.
    fn assistant_message(&self, response: &Message, calls: &[ToolCallRequest]) -> Message;

    /// One message per result, in the order of `calls`.
    fn result_messages(&self, calls: &[ToolCallRequest], results: &[ToolExecutionResult]) -> Vec<Message>;

    /// Text that opens a tool call inside streamed output, if calls arrive as text.
    ///
    /// Streaming holds back anything from this marker on until it knows
    /// whether a call follows.
    fn stream_marker(&self) -> Option<&str> {
        None
    }
}
