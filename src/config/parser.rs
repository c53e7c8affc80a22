//! Pipeline Parser
//!
//! Loads pipeline definitions from YAML files or strings.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::PipelineConfig;
use super::validator::validate_pipeline;
use crate::error::{MonitorError, Result};

/// Built-in CASA pipeline used when no file is given.
const DEFAULT_PIPELINE_YAML: &str = include_str!("../../pipelines/casa.yaml");

/// Parses and validates a pipeline from YAML text.
pub fn parse_pipeline(yaml: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = serde_yaml::from_str(yaml)?;

    debug!(
        "Parsed {} tasks, toolkit '{}'",
        config.tasks.len(),
        config.toolkit.program
    );

    validate_pipeline(&config).map_err(MonitorError::InvalidPipeline)?;
    Ok(config)
}

/// Loads a pipeline from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use casa_monitor::config::load_pipeline;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_pipeline("pipeline.yaml")?;
///     println!("Loaded {} tasks", config.tasks.len());
///     Ok(())
/// }
/// ```
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let path = path.as_ref();
    info!("Loading pipeline from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|source| MonitorError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_pipeline(&yaml_content)
}

/// Returns the built-in four-task CASA pipeline.
pub fn default_pipeline() -> Result<PipelineConfig> {
    parse_pipeline(DEFAULT_PIPELINE_YAML)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::CleanupPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_pipeline() {
        let config = default_pipeline().unwrap();
        assert_eq!(
            config.task_names(),
            vec!["1.tclean", "2.immath", "3.imstat", "4.exportfits"]
        );
        assert_eq!(config.port, 9091);
        assert_eq!(config.string_params()["image_size"], "512");
        assert_eq!(config.string_params()["channels"], "50");
    }

    #[test]
    fn test_parse_minimal_pipeline() {
        let yaml = r#"
tasks:
  - name: hello
    command: echo hello
"#;
        let config = parse_pipeline(yaml).unwrap();
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.namespace, "casa");
        assert_eq!(config.cleanup, CleanupPolicy::Ask);
    }

    #[test]
    fn test_parse_full_pipeline() {
        let yaml = r#"
name: shell demo
namespace: demo
port: 9100
bind_address: 127.0.0.1
work_dir: /tmp/demo
cleanup: always
sample_window_ms: 250
toolkit:
  program: bash
  probe_args: ["-c", "true"]
  script_extension: sh
tasks:
  - name: a
    command: "true"
    description: first
  - name: b
    command: "false"
"#;
        let config = parse_pipeline(yaml).unwrap();
        assert_eq!(config.name, "shell demo");
        assert_eq!(config.port, 9100);
        assert_eq!(config.cleanup, CleanupPolicy::Always);
        assert_eq!(config.sample_window_ms, 250);
        assert_eq!(config.toolkit.program, "bash");
        assert!(config.toolkit.run_args.is_empty());
        assert_eq!(config.tasks[0].description.as_deref(), Some("first"));
    }

    #[test]
    fn test_parse_rejects_invalid_pipeline() {
        let err = parse_pipeline("tasks: []\n").unwrap_err();
        assert!(matches!(err, MonitorError::InvalidPipeline(_)));
    }

    #[test]
    fn test_parse_rejects_bad_yaml() {
        let err = parse_pipeline("tasks: [unclosed").unwrap_err();
        assert!(matches!(err, MonitorError::ConfigParse(_)));
    }

    #[test]
    fn test_load_pipeline_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "tasks:\n  - name: t1\n    command: echo 1").unwrap();

        let config = load_pipeline(file.path()).unwrap();
        assert_eq!(config.task_names(), vec!["t1"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_pipeline("/nonexistent/pipeline.yaml").unwrap_err();
        assert!(matches!(err, MonitorError::ConfigRead { .. }));
        assert!(err.to_string().contains("/nonexistent/pipeline.yaml"));
    }
}
