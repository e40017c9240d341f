//! Mathematical utilities: weighted percentiles and grid interpolation.

pub mod grid;
pub mod percentile;

pub use grid::*;
pub use percentile::*;
