//! The conversation loop: the heart of Toolweave.
//!
//! The loop follows a **call → act → observe** cycle:
//!
//! 1. **Send** the conversation to the model via the configured provider
//! 2. **Extract** tool calls with the active protocol adapter
//! 3. **If tool calls**: run them as one batch, append the results, go to 1
//! 4. **If text only**: that is the final answer
//!
//! Every run gets its own trace. The model call and each tool execution are
//! child runs, and logs written while they are active are attached to them.

pub mod adapter;
pub mod loop_runner;
pub mod runtime;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use adapter::{
    AdapterError, ParsedCall, StructuredAdapter, TaggedJsonGrammar, TextParsedAdapter, ToolCallAdapter,
    ToolCallGrammar,
};
pub use loop_runner::{ConversationLoop, LoopOutcome, LoopSettings};
pub use runtime::{build_adapter, build_trace_store};
pub use stream::ResponseStream;
