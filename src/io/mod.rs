//! Input/output helpers.
//!
//! - rawphot + spectrum reading (`rawphot`)
//! - external sampler invocation and output parsing (`sampler`)
//! - diagnostic CSV tables (`diagnostics`)
//! - best-result JSON export (`export`)
//! - per-target locking (`lock`)

pub mod diagnostics;
pub mod export;
pub mod lock;
pub mod rawphot;
pub mod sampler;

pub use export::*;
pub use lock::*;
pub use rawphot::*;
pub use sampler::*;
