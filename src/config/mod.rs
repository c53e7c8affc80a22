//! Pipeline Configuration Module
//!
//! Describes the tasks to run, the toolkit that runs them and where the
//! metrics are exposed.
//!
//! # Structure
//!
//! - [`model`]: Configuration data structures
//! - [`parser`]: YAML loading and the built-in CASA pipeline
//! - [`validator`]: Validation rules

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{CleanupPolicy, PipelineConfig, TaskDef, ToolkitConfig};
pub use parser::{default_pipeline, load_pipeline, parse_pipeline};
pub use validator::validate_pipeline;
