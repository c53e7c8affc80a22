//! Working Directory Lifecycle
//!
//! The monitor owns a single scratch directory for the duration of a run:
//! it is wiped and recreated at start and optionally removed on shutdown.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::CleanupPolicy;
use crate::error::{MonitorError, Result};

/// Handle to the scratch directory of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Removes any previous contents and creates the directory afresh.
    pub fn prepare(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let io_err = |source| MonitorError::WorkDir {
            path: path.clone(),
            source,
        };

        if path.exists() {
            debug!("Removing previous working directory: {}", path.display());
            fs::remove_dir_all(&path).map_err(io_err)?;
        }
        fs::create_dir_all(&path).map_err(io_err)?;

        info!("Working directory: {}", path.display());
        Ok(Self { path })
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the directory and everything in it.
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path).map_err(|source| MonitorError::WorkDir {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Applies `policy` on shutdown, prompting on stdin for [`CleanupPolicy::Ask`].
    ///
    /// Returns whether the directory was removed.
    pub fn finish(&self, policy: CleanupPolicy) -> Result<bool> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        self.finish_with(policy, &mut input, &mut output)
    }

    /// Same as [`WorkDir::finish`] with explicit prompt streams.
    pub fn finish_with(
        &self,
        policy: CleanupPolicy,
        input: &mut impl BufRead,
        output: &mut impl Write,
    ) -> Result<bool> {
        let remove = match policy {
            CleanupPolicy::Always => true,
            CleanupPolicy::Never => false,
            CleanupPolicy::Ask => confirm("Delete temps? (y/N): ", input, output)?,
        };

        if !remove {
            info!("Keeping working directory: {}", self.path.display());
            return Ok(false);
        }

        self.remove()?;
        info!("Removed working directory: {}", self.path.display());
        Ok(true)
    }
}

/// Asks a yes/no question; only an explicit yes counts.
///
/// End of input (a non-interactive stdin) answers no.
pub fn confirm(question: &str, input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    write!(output, "{}", question)?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        writeln!(output)?;
        return Ok(false);
    }

    // "s"/"si" accepted alongside "y"/"yes"
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "s" | "si" | "sí"
    ))
}
