//! Building a loop from [`AppConfig`].

use std::sync::Arc;

use toolweave_config::{AppConfig, ProtocolKind, StoreKind, TracingConfig};
use toolweave_core::error::{Error, Result};
use toolweave_core::provider::Provider;
use toolweave_core::tool::ToolRegistry;
use toolweave_telemetry::{FileTraceStore, InMemoryTraceStore, TraceStore};
use toolweave_tools::ToolExecutor;
use tracing::info;

use crate::adapter::{StructuredAdapter, TextParsedAdapter, ToolCallAdapter};
use crate::loop_runner::{ConversationLoop, LoopSettings};

/// The trace store described by `config`, if any.
pub fn build_trace_store(config: &TracingConfig) -> Result<Option<Arc<dyn TraceStore>>> {
    let store: Arc<dyn TraceStore> = match config.store {
        StoreKind::None => return Ok(None),
        StoreKind::Memory => Arc::new(InMemoryTraceStore::new()),
        StoreKind::File => {
            let path = config.path.as_ref().ok_or_else(|| Error::Config {
                message: "tracing.path is required for the file store".into(),
            })?;
            let store = FileTraceStore::open(path, config.rotation_policy()).map_err(|e| Error::Config {
                message: format!("cannot open trace store at {}: {e}", path.display()),
            })?;
            Arc::new(store)
        }
    };
    info!(store = store.name(), "Trace store ready");
    Ok(Some(store))
}

pub fn build_adapter(protocol: ProtocolKind) -> Arc<dyn ToolCallAdapter> {
    match protocol {
        ProtocolKind::Structured => Arc::new(StructuredAdapter::new()),
        ProtocolKind::Text => Arc::new(TextParsedAdapter::new()),
    }
}

impl ConversationLoop {
    /// A loop wired from configuration: adapter, limits, tool execution
    /// policy and trace store.
    pub fn from_config(config: &AppConfig, provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>) -> Result<Self> {
        config.validate().map_err(|e| Error::Config { message: e.to_string() })?;

        let executor = ToolExecutor::new(registry)
            .with_timeout(Some(config.tools.timeout()))
            .with_parallel(config.tools.parallel)
            .with_max_concurrency(config.tools.max_concurrency);

        let settings = LoopSettings {
            model: config.agent.model.clone(),
            temperature: config.agent.temperature,
            max_tokens: config.agent.max_tokens,
            max_iterations: config.agent.max_iterations,
            iteration_timeout: config.agent.iteration_timeout(),
            conversation_timeout: config.agent.conversation_timeout(),
        };

        let mut agent = ConversationLoop::new(provider, executor)
            .with_adapter(build_adapter(config.agent.protocol))
            .with_settings(settings);
        if let Some(store) = build_trace_store(&config.tracing)? {
            agent = agent.with_trace_store(store);
        }
        Ok(agent)
    }
}
