//! Build pipeline.
//!
//! Turns a project's entry points into bundle artifacts. The pieces:
//! - **Context**: the immutable [`PipelineConfig`] for a run
//! - **Discovery**: glob expansion for the validation report files
//! - **Pipeline**: the coordinator that walks the module graph, schedules
//!   stages and hands the graph to the emitter
//! - **Result**: the [`RunReport`] with batched per-input errors
//!
//! # Example
//!
//! ```ignore
//! use renderpack::build::{Pipeline, PipelineConfig};
//! use renderpack::config::load_config;
//! use renderpack::mode::Mode;
//! use renderpack::validate::TracingSink;
//!
//! let (config, path) = load_config(None)?;
//! let root = renderpack::config::project_root(&config, path.as_deref());
//! let pipeline = Pipeline::new(PipelineConfig::new(&config, root, Mode::Production))?;
//!
//! let report = pipeline.run(Box::new(TracingSink))?;
//! println!("{}", report.summary());
//! ```

pub mod context;
pub mod discovery;
pub mod pipeline;
pub mod result;

pub use context::*;
pub use discovery::*;
pub use pipeline::*;
pub use result::*;
