//! Implicit trace-context propagation across async boundaries.
//!
//! The active [`TraceScope`] lives in a tokio task-local, so it follows a
//! future across `.await` points but never leaks between concurrently
//! running conversations. Entering a scope restores the previous one on
//! every exit path, including errors, panics and cancellation.
//!
//! Spawned tasks do not inherit task-locals. Use [`spawn`] or [`inherit`]
//! to carry the current scope into a new task.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::context::{RunType, TraceContext};
use crate::event::{EventStatus, TraceEvent};
use crate::store::{self, TraceStore};

tokio::task_local! {
    static CURRENT: Option<TraceScope>;
}

/// A trace context paired with the store its events go to.
#[derive(Clone)]
pub struct TraceScope {
    context: TraceContext,
    store: Option<Arc<dyn TraceStore>>,
}

impl TraceScope {
    pub fn new(context: TraceContext, store: Option<Arc<dyn TraceStore>>) -> Self {
        Self { context, store }
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn store(&self) -> Option<&Arc<dyn TraceStore>> {
        self.store.as_ref()
    }

    /// A nested scope writing to the same store.
    pub fn child(&self, run_type: RunType, operation: impl Into<String>) -> Self {
        Self {
            context: self.context.create_child(run_type, operation),
            store: self.store.clone(),
        }
    }

    /// Run `fut` with this scope active.
    ///
    /// When a store is attached the future is also instrumented with a
    /// `trace` span, so ordinary log lines carry the correlation ids.
    pub fn scope<F: Future>(self, fut: F) -> impl Future<Output = F::Output> {
        let span = self.span();
        CURRENT.scope(Some(self), fut.instrument(span))
    }

    /// Synchronous counterpart of [`scope`](Self::scope).
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        let span = self.span();
        let _entered = span.enter();
        CURRENT.sync_scope(Some(self), f)
    }

    /// Best-effort write of one event.
    pub fn emit(&self, event: TraceEvent) {
        if let Some(store) = &self.store {
            store::record(store.as_ref(), &event);
        }
    }

    /// Emit `<run_type>.start` for this scope and return a timer for the end event.
    pub fn start_run(&self, inputs: Value) -> RunTimer {
        let started = Instant::now();
        self.emit(
            TraceEvent::new(&self.context, format!("{}.start", self.context.run_type()), EventStatus::Started)
                .with_inputs(inputs),
        );
        RunTimer {
            scope: self.clone(),
            started,
            finished: false,
        }
    }

    fn span(&self) -> tracing::Span {
        if self.store.is_none() {
            return tracing::Span::none();
        }
        tracing::info_span!(
            "trace",
            trace_id = %self.context.trace_id(),
            run_id = %self.context.run_id(),
            run_type = %self.context.run_type(),
            operation = %self.context.operation(),
        )
    }
}

impl std::fmt::Debug for TraceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceScope")
            .field("context", &self.context)
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .finish()
    }
}

/// Pairs a `.start` event with its `.end`.
///
/// Dropped without [`finish`](Self::finish), for example when the future
/// owning it is cancelled, it records an `Error` end with
/// `{"error": "cancelled"}`.
#[must_use = "call finish() to record the end event"]
pub struct RunTimer {
    scope: TraceScope,
    started: Instant,
    finished: bool,
}

impl RunTimer {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Emit `<run_type>.end` and return the measured duration.
    pub fn finish(mut self, status: EventStatus, outputs: Value) -> Duration {
        self.finished = true;
        self.emit_end(status, outputs)
    }

    fn emit_end(&self, status: EventStatus, outputs: Value) -> Duration {
        let elapsed = self.started.elapsed();
        let context = self.scope.context();
        self.scope.emit(
            TraceEvent::new(context, format!("{}.end", context.run_type()), status)
                .with_outputs(outputs)
                .with_duration(elapsed),
        );
        elapsed
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.emit_end(EventStatus::Error, json!({ "error": "cancelled" }));
        }
    }
}

/// The scope active in the current task, if any.
pub fn current() -> Option<TraceScope> {
    CURRENT.try_with(|scope| scope.clone()).ok().flatten()
}

pub fn current_context() -> Option<TraceContext> {
    current().map(|scope| scope.context)
}

/// Wrap `fut` so it runs under the scope active right now.
///
/// Needed for anything handed to `tokio::spawn`, a `JoinSet`, or another
/// executor, since those start with no task-locals.
pub fn inherit<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let scope = current();
    let span = scope.as_ref().map_or_else(tracing::Span::none, TraceScope::span);
    CURRENT.scope(scope, fut.instrument(span))
}

/// `tokio::spawn` that carries the current scope into the new task.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(inherit(fut))
}
