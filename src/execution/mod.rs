//! Task Execution Module
//!
//! Runs the pipeline's tasks one after another and measures each of them.
//!
//! # Architecture
//!
//! - [`task`]: The task abstraction and its closure/command implementations
//! - [`runner`]: Times a single task and records its outcome as metrics
//! - [`pipeline`]: Ordered task list and run-level aggregation

pub mod pipeline;
pub mod runner;
pub mod task;

pub use pipeline::{Pipeline, PipelineSummary};
pub use runner::{TaskResult, TaskRunner};
pub use task::{CommandTask, FnTask, Task, TaskContext, TaskOutcome};
