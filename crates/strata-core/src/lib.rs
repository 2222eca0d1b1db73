//! # strata-core
//!
//! Flattened-tensor primitives and error types for strata.
//!
//! This crate provides:
//! - [`tensor`] — convolution, back-convolution, dilation, rotation and
//!   element-wise arithmetic on `[channel][row][col]` slices
//! - [`MapGeometry`] — side length + channel count of a flattened map
//! - [`Error`] / [`Result`] — the single error type used across strata

// A tensor here is just a `Vec<f64>`: the owning layer carries its geometry.
// There is no autograd; every backward pass is written out by hand on top of
// the functions in `tensor`.

pub mod error;
pub mod geometry;
pub mod tensor;

pub use error::{Error, ErrorKind, Result};
pub use geometry::MapGeometry;
