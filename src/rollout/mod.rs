//! Rollout layer: environments, episodes and population evaluation.
//!
//! - [`Environment`] / [`EnvBinding`]: the simulation interface and the
//!   frame pipeline (background subtraction, stride downsampling,
//!   channel mean).
//! - [`SkipPolicy`] / [`Aggregation`]: frame skipping and how skipped
//!   observations collapse into one.
//! - [`RolloutEngine`]: one episode, tracking its most novel observation.
//! - [`ParallelEvaluator`]: a population of episodes, sequential or on a
//!   worker pool, merged back into the compressor in genotype order.

pub mod aggregation;
pub mod engine;
pub mod environment;
pub mod evaluator;
pub mod testing;

pub use aggregation::{Aggregation, Preprocessing, SkipPolicy};
pub use engine::{
    select_action, NoveltyTracker, Representative, RolloutEngine, RolloutOutcome, RolloutSettings,
    Termination,
};
pub use environment::{EnvBinding, EnvFactory, Environment, Frame, StepOutcome, Transition};
pub use evaluator::{DivergencePolicy, Evaluation, EvaluationMode, ParallelEvaluator};
