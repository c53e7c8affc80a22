//! Metrics Registry
//!
//! Fixed set of gauges and counters describing a pipeline run, rendered in
//! the Prometheus text exposition format.
//!
//! The registry is built once per process from the declared task names and
//! shared behind an `Arc`. Every series value is a single atomic word, so a
//! scrape never observes a half-written value. The task label space is
//! closed: updates for task names that were not declared are rejected.

use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::MetricsError;

/// Label key used by the per-task duration gauge.
pub const TASK_LABEL: &str = "task";

/// Gauge instruments known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gauge {
    /// Wall-clock seconds of the last run of a task, labeled by task name
    TaskSeconds,
    /// Host CPU usage percentage
    CpuPercent,
    /// Resident memory of this process in MiB
    MemoryMb,
    /// 1 when every task of the last run succeeded, 0 otherwise
    PipelineOk,
}

/// Counter instruments known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    TasksOk,
    TasksFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gauge,
    Counter,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Gauge => "gauge",
            Kind::Counter => "counter",
        }
    }
}

struct Series {
    label_value: Option<String>,
    /// f64 bits for gauges, raw count for counters
    value: AtomicU64,
    written: AtomicBool,
}

impl Series {
    fn unlabeled() -> Self {
        Self {
            label_value: None,
            value: AtomicU64::new(0),
            written: AtomicBool::new(true),
        }
    }

    fn labeled(value: &str) -> Self {
        Self {
            label_value: Some(value.to_string()),
            value: AtomicU64::new(0),
            written: AtomicBool::new(false),
        }
    }
}

struct Family {
    name: String,
    help: &'static str,
    kind: Kind,
    label_key: Option<&'static str>,
    series: Vec<Series>,
}

impl Family {
    fn new(namespace: &str, suffix: &str, help: &'static str, kind: Kind) -> Self {
        Self {
            name: format!("{}_{}", namespace, suffix),
            help,
            kind,
            label_key: None,
            series: vec![Series::unlabeled()],
        }
    }

    fn with_label(mut self, key: &'static str, values: &[String]) -> Self {
        self.label_key = Some(key);
        self.series = values.iter().map(|v| Series::labeled(v)).collect();
        self
    }

    /// Finds the series addressed by `labels`, enforcing the declared label set.
    fn series(&self, labels: &[(&str, &str)]) -> Result<&Series, MetricsError> {
        match (self.label_key, labels) {
            (None, []) => Ok(&self.series[0]),
            (Some(key), [(k, v)]) if *k == key => self
                .series
                .iter()
                .find(|s| s.label_value.as_deref() == Some(*v))
                .ok_or_else(|| MetricsError::UnknownLabelValue {
                    metric: self.name.clone(),
                    label: key.to_string(),
                    value: v.to_string(),
                }),
            _ => Err(MetricsError::LabelMismatch {
                metric: self.name.clone(),
                expected: self.label_key.iter().map(|k| k.to_string()).collect(),
                got: labels.iter().map(|(k, _)| k.to_string()).collect(),
            }),
        }
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, self.kind.as_str());

        for series in &self.series {
            if !series.written.load(Ordering::Acquire) {
                continue;
            }
            let raw = series.value.load(Ordering::Acquire);
            let value = match self.kind {
                Kind::Gauge => format_float(f64::from_bits(raw)),
                Kind::Counter => raw.to_string(),
            };
            match (self.label_key, &series.label_value) {
                (Some(key), Some(label)) => {
                    let _ = writeln!(
                        out,
                        "{}{{{}=\"{}\"}} {}",
                        self.name,
                        key,
                        escape_label(label),
                        value
                    );
                }
                _ => {
                    let _ = writeln!(out, "{} {}", self.name, value);
                }
            }
        }
    }
}

/// Escapes a label value for the text exposition format.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

/// In-process registry of the monitor's instruments.
///
/// # Example
///
/// ```
/// use casa_monitor::monitoring::{Counter, Gauge, MetricsRegistry};
///
/// let registry = MetricsRegistry::new("casa", &["1.tclean".to_string()]);
/// registry.set_gauge(Gauge::TaskSeconds, &[("task", "1.tclean")], 2.5).unwrap();
/// registry.increment_counter(Counter::TasksOk, &[]).unwrap();
///
/// let text = registry.render();
/// assert!(text.contains("casa_task_seconds{task=\"1.tclean\"} 2.5"));
/// assert!(text.contains("casa_tasks_ok_total 1"));
/// ```
pub struct MetricsRegistry {
    task_seconds: Family,
    cpu_percent: Family,
    memory_mb: Family,
    tasks_ok: Family,
    tasks_fail: Family,
    pipeline_ok: Family,
}

impl MetricsRegistry {
    /// Declares every instrument under `namespace`, with the task-duration
    /// gauge restricted to `task_names`.
    pub fn new(namespace: &str, task_names: &[String]) -> Self {
        Self {
            task_seconds: Family::new(
                namespace,
                "task_seconds",
                "Wall-clock duration of the last run of each task",
                Kind::Gauge,
            )
            .with_label(TASK_LABEL, task_names),
            cpu_percent: Family::new(namespace, "cpu_percent", "Host CPU usage", Kind::Gauge),
            memory_mb: Family::new(
                namespace,
                "memory_mb",
                "Resident memory of the monitor process (MB)",
                Kind::Gauge,
            ),
            tasks_ok: Family::new(namespace, "tasks_ok_total", "Tasks that succeeded", Kind::Counter),
            tasks_fail: Family::new(namespace, "tasks_fail_total", "Tasks that failed", Kind::Counter),
            pipeline_ok: Family::new(
                namespace,
                "pipeline_ok",
                "Pipeline OK (1) or Error (0)",
                Kind::Gauge,
            ),
        }
    }

    fn gauge_family(&self, gauge: Gauge) -> &Family {
        match gauge {
            Gauge::TaskSeconds => &self.task_seconds,
            Gauge::CpuPercent => &self.cpu_percent,
            Gauge::MemoryMb => &self.memory_mb,
            Gauge::PipelineOk => &self.pipeline_ok,
        }
    }

    fn counter_family(&self, counter: Counter) -> &Family {
        match counter {
            Counter::TasksOk => &self.tasks_ok,
            Counter::TasksFail => &self.tasks_fail,
        }
    }

    /// Overwrites a gauge series with `value`.
    pub fn set_gauge(
        &self,
        gauge: Gauge,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<(), MetricsError> {
        let series = self.gauge_family(gauge).series(labels)?;
        series.value.store(value.to_bits(), Ordering::Release);
        series.written.store(true, Ordering::Release);
        Ok(())
    }

    /// Adds one to a counter series.
    pub fn increment_counter(
        &self,
        counter: Counter,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        let series = self.counter_family(counter).series(labels)?;
        series.value.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Current value of a gauge series, `None` if it was never written or
    /// the labels do not address a declared series.
    pub fn gauge_value(&self, gauge: Gauge, labels: &[(&str, &str)]) -> Option<f64> {
        let series = self.gauge_family(gauge).series(labels).ok()?;
        if !series.written.load(Ordering::Acquire) {
            return None;
        }
        Some(f64::from_bits(series.value.load(Ordering::Acquire)))
    }

    /// Current value of an unlabeled counter.
    pub fn counter_value(&self, counter: Counter) -> u64 {
        self.counter_family(counter).series[0]
            .value
            .load(Ordering::Acquire)
    }

    /// Renders every instrument in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.task_seconds.render(&mut out);
        self.cpu_percent.render(&mut out);
        self.memory_mb.render(&mut out);
        self.tasks_ok.render(&mut out);
        self.tasks_fail.render(&mut out);
        self.pipeline_ok.render(&mut out);
        out
    }
}
