//! Monitoring Module
//!
//! Measurements taken around each task and the ways they are exposed.
//!
//! # Components
//!
//! - [`MetricsRegistry`]: Gauges and counters in Prometheus text format
//! - [`ResourceSampler`]: CPU and memory readings
//! - [`report`]: Console summary and duration chart

pub mod metrics;
pub mod report;
pub mod resource;

pub use metrics::{Counter, Gauge, MetricsRegistry, TASK_LABEL};
pub use report::{duration_chart, render_summary};
pub use resource::{ResourceSample, ResourceSampler, Sampler, DEFAULT_SAMPLE_WINDOW};
