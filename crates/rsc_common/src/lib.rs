//! Shared foundational types for the script compiler driver.
//!
//! This crate provides the content digest used to key cached builds and the
//! dependency table that records every input a compiled artifact was built from.

#![warn(missing_docs)]

pub mod deps;
pub mod hash;

pub use deps::{DependencyEntry, DependencyTable};
pub use hash::ContentHash;
