//! A `tracing` layer that copies log events into the active trace.
//!
//! Any `tracing` event emitted while a [`TraceScope`](crate::TraceScope)
//! with a store is active becomes a `tool.log` record carrying that scope's
//! ids. Logging outside a scope is left to the other layers.

use std::cell::Cell;

use serde_json::{Map, Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::event::{EventStatus, TraceEvent, names};
use crate::propagation;
use crate::store;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

/// Clears the re-entrancy flag when dropped, even on panic.
struct CaptureGuard;

impl CaptureGuard {
    fn enter() -> Option<Self> {
        CAPTURING.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(Self)
            }
        })
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|flag| flag.set(false));
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContextAwareLayer;

impl ContextAwareLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S: Subscriber> Layer<S> for ContextAwareLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Store internals log while holding their own locks.
        if metadata.target().starts_with(env!("CARGO_CRATE_NAME")) {
            return;
        }
        let Some(_guard) = CaptureGuard::enter() else {
            return;
        };
        let Some(scope) = propagation::current() else {
            return;
        };
        let Some(store) = scope.store() else {
            return;
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let record = TraceEvent::new(scope.context(), names::TOOL_LOG, EventStatus::Info).with_outputs(json!({
            "level": metadata.level().as_str(),
            "target": metadata.target(),
            "message": visitor.message,
            "fields": visitor.fields,
        }));
        store::record(store.as_ref(), &record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, json!(format!("{value:?}")));
    }
}
