//! Tools backed by plain closures.
//!
//! Most tools are a schema plus a function. [`FunctionTool`] wraps either a
//! synchronous closure or one returning a future, so the executor can treat
//! both the same way.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use toolweave_core::error::ToolError;
use toolweave_core::schema::{ParametersSchema, ToolArguments};
use toolweave_core::tool::Tool;

type SyncHandler = dyn Fn(ToolArguments) -> Result<Value, ToolError> + Send + Sync;
type AsyncHandler = dyn Fn(ToolArguments) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

enum Handler {
    Sync(Arc<SyncHandler>),
    Async(Arc<AsyncHandler>),
}

pub struct FunctionTool {
    name: String,
    description: String,
    parameters: ParametersSchema,
    handler: Handler,
}

impl FunctionTool {
    /// A tool whose body runs inline on the executor's task.
    ///
    /// Keep these short; a blocking body cannot be interrupted by the
    /// executor's timeout.
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParametersSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Handler::Sync(Arc::new(handler)),
        }
    }

    /// A tool whose body is asynchronous.
    pub fn new_async<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParametersSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Handler::Async(Arc::new(move |args| Box::pin(handler(args)))),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.handler, Handler::Async(_))
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> ParametersSchema {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: ToolArguments) -> Result<Value, ToolError> {
        match &self.handler {
            Handler::Sync(f) => f(arguments),
            Handler::Async(f) => f(arguments).await,
        }
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("async", &self.is_async())
            .finish()
    }
}
