//! Semantic cluster maps of Lean formalizations.
//!
//! Snippets are embedded, clustered at two granularities, projected to 2D and
//! drawn as a side-by-side PNG with the most central snippet of every cluster
//! labelled. [`pipeline::Pipeline`] is the entry point.

pub mod analysis;
pub mod capabilities;
pub mod cli;
pub mod config;
mod error;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod render;

pub use error::{AppError, AppResult, ErrorKind};
