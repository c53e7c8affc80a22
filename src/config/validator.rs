//! Pipeline Validation
//!
//! Checks a parsed configuration before anything is created on disk or
//! registered as a metric.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{PipelineConfig, TaskDef};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyPipeline,
    EmptyTaskName(usize),
    DuplicateTaskName(String),
    EmptyCommand(String),
    InvalidNamespace(String),
    EmptyToolkitProgram,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPipeline => write!(f, "Pipeline has no tasks"),
            Self::EmptyTaskName(index) => {
                write!(f, "Task #{} has empty or whitespace-only name", index + 1)
            }
            Self::DuplicateTaskName(name) => write!(f, "Duplicate task name: '{}'", name),
            Self::EmptyCommand(name) => write!(f, "Task '{}' has no command specified", name),
            Self::InvalidNamespace(ns) => write!(
                f,
                "Metric namespace '{}' must match [a-zA-Z_:][a-zA-Z0-9_:]*",
                ns
            ),
            Self::EmptyToolkitProgram => write!(f, "Toolkit program is empty"),
        }
    }
}

/// Whether `name` is a valid Prometheus metric name prefix.
fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Validates a single task's fields.
fn validate_task(index: usize, task: &TaskDef, params: &HashSet<&str>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if task.name.trim().is_empty() {
        errors.push(ValidationError::EmptyTaskName(index));
        return errors;
    }

    if task.command.trim().is_empty() {
        errors.push(ValidationError::EmptyCommand(task.name.clone()));
    }

    // Unknown placeholders are left in place, which is usually a typo
    for placeholder in placeholders(&task.command) {
        if placeholder != "work_dir" && placeholder != "task" && !params.contains(placeholder) {
            debug!(
                "Task '{}': {{{}}} is not a known parameter and will be left as-is",
                task.name, placeholder
            );
        }
    }

    errors
}

/// Identifier-like `{name}` tokens in a command.
fn placeholders(command: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = command;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let candidate = &after[..close];
                if !candidate.is_empty()
                    && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    found.push(candidate);
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }

    found
}

/// Validates the entire pipeline configuration.
///
/// Performs the following checks:
/// 1. Pipeline has at least one task
/// 2. Task names are non-empty and unique (they become metric labels)
/// 3. Every task has a command
/// 4. The metric namespace is a valid metric name
/// 5. A toolkit program is configured
pub fn validate_pipeline(config: &PipelineConfig) -> Result<(), String> {
    info!("Validating pipeline with {} tasks", config.tasks.len());

    if config.tasks.is_empty() {
        return Err(ValidationError::EmptyPipeline.to_string());
    }

    let mut all_errors = Vec::new();

    if !is_valid_metric_name(&config.namespace) {
        all_errors.push(ValidationError::InvalidNamespace(config.namespace.clone()));
    }

    if config.toolkit.program.trim().is_empty() {
        all_errors.push(ValidationError::EmptyToolkitProgram);
    }

    let params: HashSet<&str> = config.params.keys().map(String::as_str).collect();
    let mut seen_names: HashSet<&str> = HashSet::new();

    for (index, task) in config.tasks.iter().enumerate() {
        all_errors.extend(validate_task(index, task, &params));

        if !task.name.trim().is_empty() && !seen_names.insert(task.name.as_str()) {
            all_errors.push(ValidationError::DuplicateTaskName(task.name.clone()));
        }
    }

    if config.sample_window_ms == 0 {
        warn!("sample_window_ms is 0; CPU readings will use the minimum refresh interval");
    }

    if !all_errors.is_empty() {
        let error_messages: Vec<String> = all_errors.iter().map(|e| e.to_string()).collect();
        return Err(error_messages.join("\n"));
    }

    info!("Pipeline validated: {} tasks", config.tasks.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        let mut config = PipelineConfig::new();
        config.add_task(TaskDef::new("1.tclean", "print('a')"));
        config.add_task(TaskDef::new("2.immath", "print('b')"));
        config
    }

    #[test]
    fn test_valid_pipeline() {
        assert!(validate_pipeline(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_pipeline() {
        let err = validate_pipeline(&PipelineConfig::new()).unwrap_err();
        assert_eq!(err, "Pipeline has no tasks");
    }

    #[test]
    fn test_duplicate_task_names() {
        let mut config = valid_config();
        config.add_task(TaskDef::new("1.tclean", "print('c')"));

        let err = validate_pipeline(&config).unwrap_err();
        assert!(err.contains("Duplicate task name: '1.tclean'"));
    }

    #[test]
    fn test_empty_name_and_command() {
        let mut config = valid_config();
        config.add_task(TaskDef::new("   ", "x"));
        config.add_task(TaskDef::new("3.imstat", "  "));

        let err = validate_pipeline(&config).unwrap_err();
        assert!(err.contains("Task #3 has empty"));
        assert!(err.contains("Task '3.imstat' has no command"));
    }

    #[test]
    fn test_invalid_namespace() {
        let mut config = valid_config();
        config.namespace = "9casa-monitor".to_string();

        let err = validate_pipeline(&config).unwrap_err();
        assert!(err.contains("9casa-monitor"));
    }

    #[test]
    fn test_empty_toolkit_program() {
        let mut config = valid_config();
        config.toolkit.program = String::new();
        assert!(validate_pipeline(&config)
            .unwrap_err()
            .contains("Toolkit program is empty"));
    }

    #[test]
    fn test_metric_name_rules() {
        assert!(is_valid_metric_name("casa"));
        assert!(is_valid_metric_name("_x:y_1"));
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1abc"));
        assert!(!is_valid_metric_name("a-b"));
    }

    #[test]
    fn test_placeholders() {
        let found = placeholders("fromshape('{work_dir}/x', [{image_size}, {a b}, {}]) {");
        assert_eq!(found, vec!["work_dir", "image_size"]);
    }
}
