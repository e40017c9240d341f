//! Result computation.
//!
//! Responsibilities:
//!
//! - decide whether a cached result is still valid (`cache`)
//! - run or reuse the external sampler (`inference`)
//! - derive physical quantities from the posterior (`derive`)
//! - fit model families to a target and rank them by evidence (`selection`)

pub mod cache;
pub mod context;
pub mod derive;
pub mod fitter;
pub mod inference;
pub mod selection;

#[cfg(test)]
pub(crate) mod testkit;

pub use cache::{CacheStatus, ResultCache};
pub use context::*;
pub use derive::*;
pub use fitter::*;
pub use inference::*;
pub use selection::*;
