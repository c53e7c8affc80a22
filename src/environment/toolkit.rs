//! External Toolkit Discovery
//!
//! Locates the launcher of the scientific toolkit and checks it answers
//! before any task is attempted.
//!
//! # Resolution Priority
//!
//! The launcher binary is resolved in the following order:
//! 1. Explicit path: used as-is when the configured program contains a separator
//! 2. Bundled path: next to the casa-monitor executable
//! 3. System PATH: located with `which`

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::ToolkitConfig;

/// The toolkit could not be used.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolkitError {
    #[error("toolkit launcher '{0}' not found (searched next to the executable and PATH)")]
    NotFound(String),

    #[error("toolkit launcher '{program}' did not answer its probe: {message}")]
    ProbeFailed { program: String, message: String },
}

/// A located, responsive toolkit launcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Toolkit {
    /// Absolute or PATH-resolved launcher location
    pub path: PathBuf,
    /// First non-empty line printed by the probe, if any
    pub version: Option<String>,
    /// Arguments placed before each task script
    pub run_args: Vec<String>,
    /// Extension given to task scripts
    pub script_extension: String,
}

impl Toolkit {
    /// Resolves the launcher and runs its probe command.
    ///
    /// A missing or failing launcher is reported as an error so the caller
    /// can stop before running any task.
    pub fn verify(config: &ToolkitConfig) -> Result<Self, ToolkitError> {
        let path = resolve_program(&config.program)
            .ok_or_else(|| ToolkitError::NotFound(config.program.clone()))?;

        debug!("Probing toolkit: {} {:?}", path.display(), config.probe_args);

        let output = Command::new(&path)
            .args(&config.probe_args)
            .output()
            .map_err(|e| ToolkitError::ProbeFailed {
                program: config.program.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("exit status {}", output.status));
            return Err(ToolkitError::ProbeFailed {
                program: config.program.clone(),
                message,
            });
        }

        let version = first_line(&output.stdout).or_else(|| first_line(&output.stderr));
        info!(
            "Using toolkit: {}{}",
            path.display(),
            version
                .as_deref()
                .map(|v| format!(" ({})", v))
                .unwrap_or_default()
        );

        Ok(Self {
            path,
            version,
            run_args: config.run_args.clone(),
            script_extension: config.script_extension.clone(),
        })
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Locates a launcher program.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    // Priority 1: explicit path
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }

    // Priority 2: bundled next to the executable
    if let Some(bundled) = bundled_path(program) {
        if bundled.is_file() {
            debug!("Using bundled launcher: {}", bundled.display());
            return Some(bundled);
        }
    }

    // Priority 3: system PATH
    match Command::new("which").arg(program).output() {
        Ok(output) if output.status.success() => {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if path_str.is_empty() {
                None
            } else {
                Some(PathBuf::from(path_str))
            }
        }
        Ok(_) => None,
        Err(e) => {
            warn!("Could not run 'which' to locate '{}': {}", program, e);
            None
        }
    }
}

fn bundled_path(program: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_dir: &Path = exe_path.parent()?;
    Some(exe_dir.join(program))
}
