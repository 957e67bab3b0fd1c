//! Tool execution for Toolweave.
//!
//! Concrete tools live with the application; this crate provides the
//! closure-backed [`FunctionTool`] and the [`ToolExecutor`] that binds
//! arguments, enforces timeouts, captures panics and runs batches
//! concurrently while keeping results in request order.

pub mod executor;
pub mod function;

pub use executor::ToolExecutor;
pub use function::FunctionTool;
