//! Trace store trait and the in-memory implementation.

use std::sync::RwLock;

use crate::event::TraceEvent;

#[derive(Debug, thiserror::Error)]
pub enum TraceStoreError {
    #[error("trace store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("trace store lock poisoned")]
    Poisoned,
}

/// Append-only sink for trace events.
///
/// Implementations must accept concurrent `save` calls from many
/// conversations without losing or interleaving records.
pub trait TraceStore: Send + Sync {
    fn name(&self) -> &str;

    fn save(&self, event: &TraceEvent) -> Result<(), TraceStoreError>;

    /// Every stored event, in the order it was saved.
    fn events(&self) -> Result<Vec<TraceEvent>, TraceStoreError>;

    fn events_for_trace(&self, trace_id: &str) -> Result<Vec<TraceEvent>, TraceStoreError> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|e| e.trace_id == trace_id)
            .collect())
    }
}

/// Save an event, logging instead of failing.
///
/// Tracing must never break the request it observes.
pub fn record(store: &dyn TraceStore, event: &TraceEvent) {
    if let Err(e) = store.save(event) {
        tracing::warn!(store = store.name(), event = %event.event, error = %e, "Failed to persist trace event");
    }
}

/// Keeps every event in a vector. Used by tests and short-lived processes.
#[derive(Default)]
pub struct InMemoryTraceStore {
    events: RwLock<Vec<TraceEvent>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceStore for InMemoryTraceStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn save(&self, event: &TraceEvent) -> Result<(), TraceStoreError> {
        self.events
            .write()
            .map_err(|_| TraceStoreError::Poisoned)?
            .push(event.clone());
        Ok(())
    }

    fn events(&self) -> Result<Vec<TraceEvent>, TraceStoreError> {
        Ok(self.events.read().map_err(|_| TraceStoreError::Poisoned)?.clone())
    }
}
