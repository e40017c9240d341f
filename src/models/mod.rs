//! Component models and the tabulated model library.
//!
//! The fitting engine only talks to the `ModelLibrary` / `ComponentModel`
//! interface; `grid` is the file-backed implementation used by the binary.

pub mod component;
pub mod grid;

pub use component::*;
pub use grid::*;
