//! High-level API.
//!
//! This layer provides [`UlerlExperiment`], which owns a compressor, a
//! controller, a search strategy, the dimensionality adapter and an
//! evaluator, and runs the generation loop over them.
//!
//! For custom loops, use [`memory`](crate::memory),
//! [`evolution`](crate::evolution) and [`rollout`](crate::rollout)
//! directly.

pub mod experiment;

pub use experiment::{ExperimentSnapshot, GenerationStats, UlerlExperiment, EXTENDED_HORIZON};
