//! Pipeline Configuration Model
//!
//! Data structures describing what the monitor runs and how it exposes
//! the results.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: CASA pipeline monitor
//! namespace: casa
//! port: 9091
//! work_dir: ~/casa_demo
//! cleanup: ask
//!
//! toolkit:
//!   program: casa
//!   probe_args: [--version]
//!   run_args: [--nologger, --nogui, -c]
//!   script_extension: py
//!
//! params:
//!   image_size: 512
//!   channels: 50
//!
//! tasks:
//!   - name: 1.tclean
//!     description: Create an empty cube
//!     command: |
//!       from casatools import image
//!       ia = image()
//!       ia.fromshape("{work_dir}/img1.image", [{image_size}, {image_size}, 1, {channels}])
//!       ia.close()
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default port for the metrics endpoint.
pub const DEFAULT_PORT: u16 = 9091;

/// Default metric name prefix.
pub const DEFAULT_NAMESPACE: &str = "casa";

/// Default working directory, relative to the user's home.
pub const DEFAULT_WORK_DIR: &str = "~/casa_demo";

/// What to do with the working directory on shutdown.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Prompt on the terminal; anything but an explicit yes keeps the files
    #[default]
    Ask,
    /// Always remove the working directory
    Always,
    /// Never remove the working directory
    Never,
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" => Ok(Self::Ask),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "Invalid cleanup policy '{}' (expected ask, always or never)",
                other
            )),
        }
    }
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ask => "ask",
            Self::Always => "always",
            Self::Never => "never",
        };
        f.write_str(s)
    }
}

/// How to reach the external toolkit that performs the actual work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolkitConfig {
    /// Launcher program name or path (e.g. "casa", "bash")
    pub program: String,

    /// Arguments used to check the toolkit is installed
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,

    /// Arguments placed before the generated script path
    #[serde(default)]
    pub run_args: Vec<String>,

    /// Extension given to generated task scripts
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
}

fn default_probe_args() -> Vec<String> {
    vec!["--version".to_string()]
}

fn default_script_extension() -> String {
    "py".to_string()
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            program: "casa".to_string(),
            probe_args: default_probe_args(),
            run_args: vec![
                "--nologger".to_string(),
                "--nogui".to_string(),
                "-c".to_string(),
            ],
            script_extension: default_script_extension(),
        }
    }
}

/// One unit of work in the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskDef {
    /// Short label, also used as the `task` metric label value
    pub name: String,

    /// Script body handed to the toolkit
    /// Supported placeholders: {work_dir}, {task} and every `params` key
    pub command: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskDef {
    /// Creates a new task definition.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            command: command.into(),
            description: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Complete monitor configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Display name printed in the banner
    #[serde(default = "default_name")]
    pub name: String,

    /// Prefix of every exported metric name
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Port of the metrics endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Interface the metrics endpoint binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Working directory, recreated on every start
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Working directory handling on shutdown
    #[serde(default)]
    pub cleanup: CleanupPolicy,

    /// CPU measurement window in milliseconds
    #[serde(default = "default_sample_window_ms")]
    pub sample_window_ms: u64,

    /// External toolkit settings
    #[serde(default)]
    pub toolkit: ToolkitConfig,

    /// Values substituted into task commands
    #[serde(default)]
    pub params: BTreeMap<String, serde_yaml::Value>,

    /// Tasks, run in declared order
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

fn default_name() -> String {
    "CASA pipeline monitor".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(DEFAULT_WORK_DIR)
}

fn default_sample_window_ms() -> u64 {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            namespace: default_namespace(),
            port: default_port(),
            bind_address: default_bind_address(),
            work_dir: default_work_dir(),
            cleanup: CleanupPolicy::default(),
            sample_window_ms: default_sample_window_ms(),
            toolkit: ToolkitConfig::default(),
            params: BTreeMap::new(),
            tasks: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Creates an empty configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task.
    pub fn add_task(&mut self, task: TaskDef) {
        self.tasks.push(task);
    }

    /// Declared task names in run order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    /// Parameters rendered as plain strings for placeholder substitution.
    pub fn string_params(&self) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), param_to_string(v)))
            .collect()
    }

    /// Working directory with a leading `~` expanded to the home directory.
    pub fn resolved_work_dir(&self) -> PathBuf {
        expand_home(&self.work_dir)
    }
}

fn param_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Expands a leading `~` using `HOME` (or `USERPROFILE`).
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(rest)
}
