//! `sdf-fit` library crate.
//!
//! The binary (`sdf`) is a thin wrapper around this library so that:
//!
//! - the fitting engine is testable without spawning processes
//! - the sampler and model library sit behind traits and can be swapped
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
