//! Repository implementations for database operations

pub mod evaluations;
pub mod samples;

pub use evaluations::*;
pub use samples::*;
