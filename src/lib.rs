//! renderpack - Library for transforming and bundling client renderer sources
//!
//! This library provides functionality to:
//! - Resolve the build mode once and fan it out as immutable settings
//! - Resolve import specifiers against the source tree and a substitute table
//! - Run inputs through an ordered table of transform chains, inline or on a
//!   bounded worker pool
//! - Type-check the source tree on an independent side-channel
//! - Parse scripts once per stage and rewrite them through span edits
//! - Link the results into ES module bundles with source maps

pub mod ast;
pub mod build;
pub mod cli;
pub mod config;
pub mod emit;
pub mod graph;
pub mod link;
pub mod mode;
pub mod pool;
pub mod resolve;
pub mod rules;
pub mod transforms;
pub mod validate;
pub mod watch;
