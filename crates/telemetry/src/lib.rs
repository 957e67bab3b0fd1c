//! Trace correlation and logging for Toolweave.
//!
//! A [`TraceContext`] identifies one unit of work (a conversation turn, a
//! model call, a tool execution) inside a trace. The active context travels
//! implicitly through async code via [`propagation`], and every lifecycle
//! event is appended to a [`TraceStore`] so a whole request can be
//! reconstructed from its `trace_id`.

pub mod context;
pub mod event;
pub mod file;
pub mod layer;
pub mod logging;
pub mod propagation;
pub mod store;

pub use context::{RunType, TraceContext};
pub use event::{EventStatus, TraceEvent, names};
pub use file::{FileTraceStore, RotationPolicy};
pub use layer::ContextAwareLayer;
pub use logging::LoggingOptions;
pub use propagation::{RunTimer, TraceScope};
pub use store::{InMemoryTraceStore, TraceStore, TraceStoreError};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to install logging: {0}")]
    LoggingInit(String),

    #[error(transparent)]
    Store(#[from] TraceStoreError),
}
