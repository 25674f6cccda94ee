//! Configuration module for the renderpack build pipeline
//!
//! Provides types and parsing for `renderpack.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
