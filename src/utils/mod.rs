//! Stateless helpers shared across the crate.

pub mod bootstrap;
pub mod sequence_validator;
