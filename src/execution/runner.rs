//! Task Runner
//!
//! Runs one task at a time, timing it and folding its outcome into the
//! metrics registry. A failing task never escapes the runner: every
//! outcome, including a panic inside a closure task, comes back as a
//! [`TaskResult`].

use std::any::Any;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use log::{debug, warn};

use super::task::{FnTask, Task, TaskContext, TaskOutcome};
use crate::error::TaskError;
use crate::monitoring::{Counter, Gauge, MetricsRegistry, ResourceSample, Sampler, TASK_LABEL};

/// Outcome of a single task execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    /// Task label
    pub name: String,
    /// Wall-clock time around the task call
    pub elapsed: Duration,
    /// What the task returned
    pub outcome: TaskOutcome,
}

impl TaskResult {
    /// Whether the task completed.
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Detail line reported by a completed task.
    pub fn detail(&self) -> Option<&str> {
        self.outcome.as_ref().ok().and_then(|d| d.as_deref())
    }

    /// Short failure message, if the task failed.
    pub fn error_message(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }
}

/// Executes tasks and records their measurements.
pub struct TaskRunner {
    registry: Arc<MetricsRegistry>,
    sampler: Box<dyn Sampler>,
    echo: bool,
}

impl TaskRunner {
    /// Creates a runner publishing into `registry`.
    pub fn new(registry: Arc<MetricsRegistry>, sampler: Box<dyn Sampler>) -> Self {
        Self {
            registry,
            sampler,
            echo: true,
        }
    }

    /// Enables or disables the console status line.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Takes a resource sample and publishes it.
    pub fn sample_resources(&mut self) -> ResourceSample {
        let sample = self.sampler.sample();

        for (gauge, value) in [
            (Gauge::CpuPercent, sample.cpu_percent as f64),
            (Gauge::MemoryMb, sample.memory_mb),
        ] {
            if let Err(e) = self.registry.set_gauge(gauge, &[], value) {
                warn!("Could not publish resource sample: {}", e);
            }
        }

        sample
    }

    /// Takes a resource sample without publishing it.
    pub fn peek_resources(&mut self) -> ResourceSample {
        self.sampler.sample()
    }

    /// Runs `task`, records its duration and outcome, and returns the result.
    ///
    /// 1. Samples resources and publishes CPU/memory gauges
    /// 2. Times the task call
    /// 3. Publishes the duration under the task's label
    /// 4. Increments the success or failure counter
    pub fn run(&mut self, task: &dyn Task, ctx: &TaskContext) -> TaskResult {
        let name = task.name().to_string();

        if self.echo {
            print!("{} {}... ", "▶".cyan(), name);
            let _ = std::io::stdout().flush();
        }

        self.sample_resources();

        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| task.run(ctx)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        let elapsed = start.elapsed();

        self.record(&name, elapsed, &outcome);

        let result = TaskResult {
            name,
            elapsed,
            outcome,
        };
        self.report(&result);
        result
    }

    /// Runs a closure as a task.
    pub fn run_fn<F>(&mut self, name: &str, ctx: &TaskContext, func: F) -> TaskResult
    where
        F: Fn(&TaskContext) -> TaskOutcome + Send,
    {
        self.run(&FnTask::new(name, func), ctx)
    }

    fn record(&self, name: &str, elapsed: Duration, outcome: &TaskOutcome) {
        if let Err(e) = self.registry.set_gauge(
            Gauge::TaskSeconds,
            &[(TASK_LABEL, name)],
            elapsed.as_secs_f64(),
        ) {
            warn!("Duration of task '{}' not recorded: {}", name, e);
        }

        let counter = match outcome {
            Ok(_) => Counter::TasksOk,
            Err(_) => Counter::TasksFail,
        };
        if let Err(e) = self.registry.increment_counter(counter, &[]) {
            warn!("Outcome of task '{}' not recorded: {}", name, e);
        }
    }

    fn report(&self, result: &TaskResult) {
        match &result.outcome {
            Ok(detail) => {
                debug!("Task '{}' completed in {:.2?}", result.name, result.elapsed);
                if self.echo {
                    println!("{}", success_line(result.elapsed, detail.as_deref()));
                }
            }
            Err(e) => {
                debug!("Task '{}' failed after {:.2?}: {}", result.name, result.elapsed, e);
                if self.echo {
                    println!("{} Error: {}", "✗".red(), e);
                }
            }
        }
    }
}

/// Status text printed after a completed task, e.g. `✓ (1.23s) [3.00MB]`.
fn success_line(elapsed: Duration, detail: Option<&str>) -> String {
    let mut line = format!("{} ({:.2}s)", "✓".green(), elapsed.as_secs_f64());
    if let Some(detail) = detail {
        line.push(' ');
        line.push_str(detail);
    }
    line
}

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct FixedSampler(ResourceSample);

    impl Sampler for FixedSampler {
        fn sample(&mut self) -> ResourceSample {
            self.0
        }
    }

    fn runner() -> (TaskRunner, Arc<MetricsRegistry>) {
        let names = vec!["ok".to_string(), "bad".to_string(), "slow".to_string()];
        let registry = Arc::new(MetricsRegistry::new("test", &names));
        let sampler = FixedSampler(ResourceSample {
            cpu_percent: 42.5,
            memory_mb: 256.0,
        });
        let mut runner = TaskRunner::new(Arc::clone(&registry), Box::new(sampler));
        runner.set_echo(false);
        (runner, registry)
    }

    fn ctx() -> TaskContext {
        TaskContext::new(std::env::temp_dir())
    }

    #[test]
    fn test_successful_task() {
        let (mut runner, registry) = runner();
        let result = runner.run_fn("ok", &ctx(), |_ctx: &TaskContext| Ok(None));

        assert!(result.succeeded());
        assert_eq!(result.error_message(), None);
        assert_eq!(registry.counter_value(Counter::TasksOk), 1);
        assert_eq!(registry.counter_value(Counter::TasksFail), 0);
        assert!(registry
            .gauge_value(Gauge::TaskSeconds, &[(TASK_LABEL, "ok")])
            .is_some());
    }

    #[test]
    fn test_failed_task_is_recorded_not_raised() {
        let (mut runner, registry) = runner();
        let result = runner.run_fn("bad", &ctx(), |_ctx: &TaskContext| {
            Err(TaskError::failed("image not found"))
        });

        assert!(!result.succeeded());
        assert_eq!(result.error_message().as_deref(), Some("image not found"));
        assert_eq!(registry.counter_value(Counter::TasksOk), 0);
        assert_eq!(registry.counter_value(Counter::TasksFail), 1);
        assert!(registry
            .gauge_value(Gauge::TaskSeconds, &[(TASK_LABEL, "bad")])
            .is_some());
    }

    #[test]
    fn test_panicking_task_becomes_failure() {
        let (mut runner, registry) = runner();
        let result = runner.run_fn("bad", &ctx(), |_ctx: &TaskContext| -> TaskOutcome {
            panic!("casatools exploded")
        });

        assert_eq!(
            result.outcome,
            Err(TaskError::Panicked("casatools exploded".to_string()))
        );
        assert_eq!(registry.counter_value(Counter::TasksFail), 1);
    }

    #[test]
    fn test_duration_covers_task_call() {
        let (mut runner, registry) = runner();
        let result = runner.run_fn("slow", &ctx(), |_ctx: &TaskContext| {
            thread::sleep(Duration::from_millis(60));
            Ok(None)
        });

        assert!(result.elapsed >= Duration::from_millis(60));
        let gauge = registry
            .gauge_value(Gauge::TaskSeconds, &[(TASK_LABEL, "slow")])
            .unwrap();
        assert_eq!(gauge, result.elapsed.as_secs_f64());
        assert!(gauge >= 0.06);
    }

    #[test]
    fn test_resources_published_before_task() {
        let (mut runner, registry) = runner();
        let observed = Arc::clone(&registry);

        runner.run_fn("ok", &ctx(), move |_ctx: &TaskContext| {
            assert_eq!(observed.gauge_value(Gauge::CpuPercent, &[]), Some(42.5));
            assert_eq!(observed.gauge_value(Gauge::MemoryMb, &[]), Some(256.0));
            Ok(None)
        });

        assert_eq!(registry.counter_value(Counter::TasksOk), 1);
    }

    #[test]
    fn test_undeclared_task_still_counted() {
        let (mut runner, registry) = runner();
        let result = runner.run_fn("not-declared", &ctx(), |_ctx: &TaskContext| Ok(None));

        assert!(result.succeeded());
        assert_eq!(registry.counter_value(Counter::TasksOk), 1);
        assert!(!registry.render().contains("not-declared"));
    }

    #[test]
    fn test_detail_shown_after_success_mark() {
        let (mut runner, _registry) = runner();
        let result = runner.run_fn("ok", &ctx(), |_ctx: &TaskContext| {
            Ok(Some("[image 512x512x50]".to_string()))
        });

        assert_eq!(result.detail(), Some("[image 512x512x50]"));
        colored::control::set_override(false);
        assert_eq!(
            success_line(Duration::from_millis(1500), result.detail()),
            "✓ (1.50s) [image 512x512x50]"
        );
        assert_eq!(success_line(Duration::from_millis(250), None), "✓ (0.25s)");
    }

    #[test]
    fn test_panic_message_kinds() {
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
