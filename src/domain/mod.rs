//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the run configuration (`FitConfig`)
//! - model components, observations and estimates (`types`)
//! - persistent fit outputs (`FitResult`, `CacheLocator`, etc.)

pub mod config;
pub mod result;
pub mod types;

pub use config::*;
pub use result::*;
pub use types::*;

/// Fit results for one target, best first once sorted.
pub type ResultSet = Vec<FitResult>;
