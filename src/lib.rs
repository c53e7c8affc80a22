//! casa-monitor - Pipeline Execution Monitor
//!
//! Runs a fixed, ordered list of radio-astronomy processing tasks, measures
//! how long each one takes and what the host looked like while it ran, and
//! publishes the numbers on a Prometheus scrape endpoint that stays up after
//! the pipeline finishes.
//!
//! # Architecture
//!
//! - [`config`]: Pipeline definition (YAML) and validation
//! - [`monitoring`]: Metrics registry, resource sampling, console report
//! - [`execution`]: Tasks, the timing runner and the sequential pipeline
//! - [`environment`]: Toolkit discovery and the working directory
//! - [`server`]: HTTP endpoint and OS signal handling
//! - [`controller`]: Lifecycle state machine tying it all together
//!
//! # Example
//!
//! ```rust,no_run
//! use casa_monitor::server::listen_for_signals;
//! use casa_monitor::{default_pipeline, Controller};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = default_pipeline()?;
//!     let mut controller = Controller::new(config);
//!
//!     let shutdown = listen_for_signals()?;
//!     controller.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod environment;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod server;

// Re-export commonly used types
pub use config::{default_pipeline, load_pipeline, CleanupPolicy, PipelineConfig, TaskDef};
pub use controller::{Controller, ControllerState, RunOutcome};
pub use error::{MonitorError, Result, TaskError};
pub use execution::{Pipeline, PipelineSummary, Task, TaskContext};
pub use monitoring::MetricsRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "casa-monitor";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "casa-monitor");
    }

    #[test]
    fn test_module_exports_task_def() {
        let task = TaskDef::new("1.tclean", "print('hi')");
        assert_eq!(task.name, "1.tclean");
    }

    #[test]
    fn test_module_exports_default_pipeline() {
        let config = default_pipeline().unwrap();
        assert_eq!(config.tasks.len(), 4);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
