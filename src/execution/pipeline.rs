//! Sequential Pipeline
//!
//! Owns the ordered task list and drives the runner over every task, in
//! declared order, without ever stopping early. Once all tasks have run the
//! results are folded into a [`PipelineSummary`] and the pipeline-health
//! gauge is set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use super::runner::{TaskResult, TaskRunner};
use super::task::{CommandTask, Task, TaskContext};
use crate::config::PipelineConfig;
use crate::environment::Toolkit;
use crate::monitoring::{Gauge, MetricsRegistry, ResourceSample, Sampler};

/// Aggregated outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSummary {
    /// Per-task results in run order
    pub results: Vec<TaskResult>,
    /// Wall-clock time of the whole run
    pub elapsed: Duration,
    /// Resource reading taken after the last task
    pub resources: ResourceSample,
}

impl PipelineSummary {
    /// Number of tasks executed.
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Number of tasks that completed.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    /// Number of tasks that failed.
    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// True when every task completed.
    pub fn is_healthy(&self) -> bool {
        self.succeeded() == self.total()
    }

    /// One-line result, e.g. `Result: 3/4 OK in 12.34s`.
    pub fn result_line(&self) -> String {
        format!(
            "Result: {}/{} OK in {:.2}s",
            self.succeeded(),
            self.total(),
            self.elapsed.as_secs_f64()
        )
    }

    /// One-line resource usage, e.g. `CPU: 12.5% | RAM: 80MB`.
    pub fn resource_line(&self) -> String {
        format!(
            "CPU: {:.1}% | RAM: {:.0}MB",
            self.resources.cpu_percent, self.resources.memory_mb
        )
    }
}

/// Ordered list of tasks plus the runner that measures them.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use casa_monitor::execution::{FnTask, Pipeline, TaskContext};
/// use casa_monitor::monitoring::{MetricsRegistry, ResourceSampler};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let names = vec!["1.tclean".to_string()];
///     let registry = Arc::new(MetricsRegistry::new("casa", &names));
///     let mut pipeline = Pipeline::new(registry, Box::new(ResourceSampler::new()?));
///     pipeline.add_task(FnTask::new("1.tclean", |_ctx: &TaskContext| Ok(None)));
///
///     let summary = pipeline.run(&TaskContext::new("/tmp/casa_demo"));
///     println!("{}", summary.result_line());
///     Ok(())
/// }
/// ```
pub struct Pipeline {
    tasks: Vec<Box<dyn Task>>,
    runner: TaskRunner,
    registry: Arc<MetricsRegistry>,
}

impl Pipeline {
    /// Creates an empty pipeline publishing into `registry`.
    pub fn new(registry: Arc<MetricsRegistry>, sampler: Box<dyn Sampler>) -> Self {
        Self {
            tasks: Vec::new(),
            runner: TaskRunner::new(Arc::clone(&registry), sampler),
            registry,
        }
    }

    /// Builds one [`CommandTask`] per configured task.
    pub fn from_config(
        config: &PipelineConfig,
        toolkit: &Toolkit,
        registry: Arc<MetricsRegistry>,
        sampler: Box<dyn Sampler>,
    ) -> Self {
        let mut pipeline = Self::new(registry, sampler);
        for def in &config.tasks {
            pipeline.add_boxed(Box::new(CommandTask::new(def, toolkit.clone())));
        }
        pipeline
    }

    /// Appends a task.
    pub fn add_task(&mut self, task: impl Task + 'static) {
        self.add_boxed(Box::new(task));
    }

    /// Appends an already boxed task.
    pub fn add_boxed(&mut self, task: Box<dyn Task>) {
        self.tasks.push(task);
    }

    /// Number of declared tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if no tasks are declared.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Declared task names in run order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Enables or disables per-task console lines.
    pub fn set_echo(&mut self, echo: bool) {
        self.runner.set_echo(echo);
    }

    /// Runs every task in order and publishes the pipeline-health gauge.
    pub fn run(&mut self, ctx: &TaskContext) -> PipelineSummary {
        info!("Running {} tasks", self.tasks.len());
        let start = Instant::now();

        let mut results = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            results.push(self.runner.run(task.as_ref(), ctx));
        }

        let elapsed = start.elapsed();
        let resources = self.runner.peek_resources();

        let summary = PipelineSummary {
            results,
            elapsed,
            resources,
        };

        let health = if summary.is_healthy() { 1.0 } else { 0.0 };
        if let Err(e) = self.registry.set_gauge(Gauge::PipelineOk, &[], health) {
            warn!("Pipeline health not recorded: {}", e);
        }

        info!(
            "Pipeline finished: {} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        );
        summary
    }
}
