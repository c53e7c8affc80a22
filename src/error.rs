//! Error types shared across the monitor.
//!
//! Task failures are deliberately kept apart from [`MonitorError`]: a
//! [`TaskError`] is always recovered by the runner and never aborts the
//! pipeline, while a [`MonitorError`] ends the process.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience result alias for fallible monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Fatal errors raised while setting up or tearing down the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("failed to read pipeline file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pipeline file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("working directory '{path}': {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind metrics endpoint on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("resource telemetry unavailable: {0}")]
    Telemetry(String),

    #[error("pipeline worker stopped unexpectedly: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single task did not complete.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("could not launch '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("{}{}", exit_status(.code), stderr_suffix(.stderr))]
    Exit { code: Option<i32>, stderr: String },

    #[error("panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Builds a generic failure from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => format!(": {}", line.trim()),
        None => String::new(),
    }
}

/// Rejected metric update.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metric '{metric}' expects labels {expected:?}, got {got:?}")]
    LabelMismatch {
        metric: String,
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("metric '{metric}' has no series for {label}=\"{value}\"")]
    UnknownLabelValue {
        metric: String,
        label: String,
        value: String,
    },
}
