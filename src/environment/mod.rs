//! Environment Management Module
//!
//! Everything outside the process the monitor depends on: the external
//! toolkit launcher and the scratch working directory.

pub mod toolkit;
pub mod workdir;

pub use toolkit::{resolve_program, Toolkit, ToolkitError};
pub use workdir::{confirm, WorkDir};
