//! Domain events and the metrics-recording interface.
//!
//! The loop reports timing events through [`MetricsRecorder`]. The bundled
//! implementation publishes them on a broadcast [`EventBus`] so exporters
//! (Prometheus, JSON, ...) can subscribe without the core knowing about them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// An operation finished successfully
    OperationSucceeded {
        operation: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An operation failed
    OperationFailed {
        operation: String,
        error_message: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Sink for success/error timing events.
///
/// Operation names used by the loop: `model_call`, `tool:<name>`, `conversation`.
pub trait MetricsRecorder: Send + Sync {
    fn record_success(&self, operation: &str, duration: Duration);

    fn record_error(&self, operation: &str, error: &str, duration: Duration);
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MetricsRecorder for EventBus {
    fn record_success(&self, operation: &str, duration: Duration) {
        self.publish(DomainEvent::OperationSucceeded {
            operation: operation.to_string(),
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    fn record_error(&self, operation: &str, error: &str, duration: Duration) {
        self.publish(DomainEvent::OperationFailed {
            operation: operation.to_string(),
            error_message: error.to_string(),
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}

/// A recorder that drops everything.
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record_success(&self, _operation: &str, _duration: Duration) {}

    fn record_error(&self, _operation: &str, _error: &str, _duration: Duration) {}
}
