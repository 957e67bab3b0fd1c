//! Runs tool calls without ever failing past its own boundary.
//!
//! Every outcome (unknown tool, bad arguments, tool error, timeout, panic)
//! becomes a [`ToolExecutionResult`] that the loop feeds back to the model.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use toolweave_core::error::ToolError;
use toolweave_core::event::{MetricsRecorder, NoopMetrics};
use toolweave_core::schema::ToolDefinition;
use toolweave_core::tool::{ToolCallRequest, ToolExecutionResult, ToolRegistry};
use toolweave_telemetry::propagation::{self, TraceScope};
use toolweave_telemetry::{EventStatus, RunType, TraceContext};
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes tool calls against a shared registry.
///
/// Cheap to clone; clones share the registry and metrics sink.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    metrics: Arc<dyn MetricsRecorder>,
    timeout: Option<Duration>,
    parallel: bool,
    max_concurrency: Option<usize>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            metrics: Arc::new(NoopMetrics),
            timeout: Some(DEFAULT_TIMEOUT),
            parallel: true,
            max_concurrency: None,
        }
    }

    /// Per-call limit. `None` lets tools run for as long as they like.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the calls of one batch concurrently (the default) or one by one.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|n| n.max(1));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Execute one call.
    ///
    /// The call runs in a `tool` child of the current trace scope, which
    /// also supplies the values for injected parameters. Outside any scope a
    /// detached context is used so injected ids are still available.
    pub async fn execute(&self, request: &ToolCallRequest) -> ToolExecutionResult {
        let scope = match propagation::current() {
            Some(parent) => parent.child(RunType::Tool, &request.name),
            None => TraceScope::new(TraceContext::create_root(RunType::Tool, &request.name, None), None),
        };
        let timer = scope.start_run(json!({
            "call_id": request.id,
            "arguments": request.arguments,
        }));
        let injected = scope.context().injected_values();

        let outcome = scope.scope(self.run(request, injected)).await;
        let elapsed = timer.elapsed();
        let operation = format!("tool:{}", request.name);

        match outcome {
            Ok(output) => {
                debug!(tool = %request.name, call_id = %request.id, duration_ms = elapsed.as_millis() as u64, "Tool succeeded");
                timer.finish(EventStatus::Success, output.clone());
                self.metrics.record_success(&operation, elapsed);
                ToolExecutionResult::success(&request.id, &request.name, output, elapsed)
            }
            Err(error) => {
                warn!(tool = %request.name, call_id = %request.id, error = %error, "Tool failed");
                timer.finish(EventStatus::Error, json!({ "error": error.to_string() }));
                self.metrics.record_error(&operation, &error.to_string(), elapsed);
                ToolExecutionResult::failure(&request.id, &request.name, &error, elapsed)
            }
        }
    }

    async fn run(&self, request: &ToolCallRequest, injected: Map<String, Value>) -> Result<Value, ToolError> {
        if let Some(reason) = &request.malformed {
            return Err(ToolError::MalformedArguments {
                tool_name: request.name.clone(),
                reason: reason.clone(),
            });
        }

        let tool = self
            .registry
            .get(&request.name)
            .ok_or_else(|| ToolError::NotFound(request.name.clone()))?;

        let arguments = tool
            .parameters()
            .bind(request.arguments.clone(), &injected)
            .map_err(|e| ToolError::InvalidArguments {
                tool_name: request.name.clone(),
                reason: e.to_string(),
            })?;

        let body = AssertUnwindSafe(tool.execute(arguments)).catch_unwind();
        let caught = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, body).await.map_err(|_| ToolError::Timeout {
                tool_name: request.name.clone(),
                timeout_ms: limit.as_millis() as u64,
            })?,
            None => body.await,
        };

        caught.unwrap_or_else(|panic| {
            Err(ToolError::Panicked {
                tool_name: request.name.clone(),
                reason: panic_message(panic.as_ref()),
            })
        })
    }

    /// Execute all calls from one model turn.
    ///
    /// Results come back in request order regardless of completion order.
    /// Dropping the returned future aborts every call still running.
    pub async fn execute_batch(&self, requests: &[ToolCallRequest]) -> Vec<ToolExecutionResult> {
        if !self.parallel || requests.len() < 2 {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.execute(request).await);
            }
            return results;
        }

        let limit = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();
        for (index, request) in requests.iter().cloned().enumerate() {
            let executor = self.clone();
            let limit = limit.clone();
            tasks.spawn(propagation::inherit(async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                (index, executor.execute(&request).await)
            }));
        }

        let mut slots: Vec<Option<ToolExecutionResult>> = vec![None; requests.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "Tool task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    let error = ToolError::failed(&request.name, "execution task was aborted");
                    ToolExecutionResult::failure(&request.id, &request.name, &error, Duration::ZERO)
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.registry.names())
            .field("timeout", &self.timeout)
            .field("parallel", &self.parallel)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
