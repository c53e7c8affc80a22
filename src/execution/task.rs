//! Task Abstraction
//!
//! A task is an opaque, failable unit of work. Outcomes are explicit
//! values: a task reports failure by returning a [`TaskError`], never by
//! unwinding.
//!
//! Two implementations are provided:
//! - [`FnTask`]: wraps a closure
//! - [`CommandTask`]: writes its command to a script and runs it through
//!   the external toolkit launcher

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, warn};

use crate::config::TaskDef;
use crate::environment::Toolkit;
use crate::error::TaskError;

/// Result of running a task.
///
/// A completed task may hand back a short detail (an image shape, a file
/// size) that is shown next to its status mark.
pub type TaskOutcome = Result<Option<String>, TaskError>;

/// Everything a task may depend on while running.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    /// Scratch directory owned by the monitor
    pub work_dir: PathBuf,
    /// Values substituted into command placeholders
    pub params: BTreeMap<String, String>,
}

impl TaskContext {
    /// Creates a context with no parameters.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds parameters for placeholder substitution.
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Substitutes `{work_dir}`, `{task}` and every parameter into `template`.
    ///
    /// Unknown placeholders are left untouched.
    pub fn render(&self, template: &str, task_name: &str) -> String {
        let mut text = template
            .replace("{work_dir}", &self.work_dir.to_string_lossy())
            .replace("{task}", task_name);

        for (key, value) in &self.params {
            text = text.replace(&format!("{{{}}}", key), value);
        }
        text
    }
}

/// A named unit of work.
pub trait Task: Send {
    /// Label used in console output and as the metric label value.
    fn name(&self) -> &str;

    /// Runs to completion, reporting failure through the returned value.
    fn run(&self, ctx: &TaskContext) -> TaskOutcome;
}

/// Task backed by a closure.
///
/// # Example
///
/// ```
/// use casa_monitor::execution::{FnTask, Task, TaskContext};
/// use casa_monitor::error::TaskError;
///
/// let task = FnTask::new("always-fails", |_ctx: &TaskContext| {
///     Err(TaskError::failed("image not found"))
/// });
/// assert_eq!(task.name(), "always-fails");
/// assert!(task.run(&TaskContext::new("/tmp")).is_err());
/// ```
pub struct FnTask<F> {
    name: String,
    func: F,
}

impl<F> FnTask<F>
where
    F: Fn(&TaskContext) -> TaskOutcome + Send,
{
    /// Wraps `func` under `name`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&TaskContext) -> TaskOutcome + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        (self.func)(ctx)
    }
}

/// Task that hands a script to the external toolkit.
///
/// The command (after placeholder substitution) is written verbatim to a
/// temporary script which is executed as
/// `<launcher> <run_args...> <script>` inside the working directory.
pub struct CommandTask {
    name: String,
    command: String,
    toolkit: Toolkit,
}

impl CommandTask {
    /// Creates a task from its definition and a verified toolkit.
    pub fn new(def: &TaskDef, toolkit: Toolkit) -> Self {
        Self {
            name: def.name.clone(),
            command: def.command.clone(),
            toolkit,
        }
    }

    /// Raw command template.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        let script_text = ctx.render(&self.command, &self.name);

        let script_path =
            create_task_script(&self.name, &script_text, &self.toolkit.script_extension)
                .map_err(|e| TaskError::failed(format!("cannot write task script: {}", e)))?;

        let result = execute_script(&self.toolkit, &script_path, &ctx.work_dir);

        // Clean up script
        if let Err(e) = fs::remove_file(&script_path) {
            warn!("Failed to clean up script {}: {}", script_path.display(), e);
        }

        result
    }
}

/// Creates a temporary script holding one task's command.
fn create_task_script(task_name: &str, text: &str, extension: &str) -> std::io::Result<PathBuf> {
    let script_dir = std::env::temp_dir().join("casa_monitor_scripts");
    fs::create_dir_all(&script_dir)?;

    let script_path = script_dir.join(format!(
        "task_{}_{}.{}",
        std::process::id(),
        sanitize_file_stem(task_name),
        extension.trim_start_matches('.')
    ));

    let mut file = File::create(&script_path)?;
    file.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        writeln!(file)?;
    }

    Ok(script_path)
}

/// Keeps task names usable as file names.
fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Runs a script through the toolkit launcher in `work_dir`.
fn execute_script(toolkit: &Toolkit, script_path: &Path, work_dir: &Path) -> TaskOutcome {
    let mut cmd = Command::new(&toolkit.path);
    cmd.args(&toolkit.run_args).arg(script_path).current_dir(work_dir);

    debug!(
        "Executing {} {:?} {} in {}",
        toolkit.path.display(),
        toolkit.run_args,
        script_path.display(),
        work_dir.display()
    );

    let output = cmd.output().map_err(|e| TaskError::Spawn {
        program: toolkit.path.display().to_string(),
        message: e.to_string(),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("stdout:\n{}", stdout);
    }

    if output.status.success() {
        Ok(last_line(&stdout))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.trim().is_empty() {
            debug!("stderr:\n{}", stderr);
        }
        Err(TaskError::Exit {
            code: output.status.code(),
            stderr,
        })
    }
}

/// Last non-empty line of a task's output.
fn last_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
