//! # Toolweave Core
//!
//! Domain types, traits, and error definitions for the Toolweave
//! tool-calling engine. This crate defines the model every other crate
//! implements against and carries no runtime wiring of its own.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here (`Provider`, `Tool`, `MetricsRecorder`).
//! Implementations live in their respective crates, or outside the workspace
//! entirely for HTTP providers and concrete tools. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{BindError, Error, ProviderError, Result, TimeoutScope, ToolError};
pub use event::{DomainEvent, EventBus, MetricsRecorder, NoopMetrics};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use schema::{ParamSpec, ParamType, ParametersSchema, SchemaError, ToolArguments, ToolDefinition};
pub use tool::{Tool, ToolCallRequest, ToolExecutionResult, ToolRegistry};
