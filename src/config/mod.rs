//! Configuration constants.
//!
//! All page-geometry and size-limit constants live in [`constants`]; import
//! them from there rather than redefining values locally.

mod constants;

pub use constants::*;
