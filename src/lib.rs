//! # ulerl: Unsupervised-Learning-based Evolutionary Reinforcement Learning
//!
//! Observations are compressed by an online codebook into small codes; a
//! natural evolution strategy searches over the weights of a controller
//! whose input width equals the codebook size. The codebook grows while
//! the search is running, and the controller and search distribution grow
//! with it without losing what was already learned.
//!
//! ## Quick Start
//!
//! ```rust
//! use ulerl::config::ExperimentConfig;
//! use ulerl::rollout::testing::ScriptedEnv;
//! use ulerl::UlerlExperiment;
//!
//! let config = ExperimentConfig::from_json_str(r#"{
//!     "run": { "max_steps": 20, "skip_frames": 2, "workers": 2 },
//!     "opt": { "kind": "bdnes" },
//!     "compr": {
//!         "kind": { "type": "growing", "initial_ncentrs": 2, "threshold": 0.9 },
//!         "similarity": "mse",
//!         "downsample": [2, 2]
//!     }
//! }"#)?;
//!
//! let factory = ScriptedEnv::new([8, 8, 3], 4, 100).factory();
//! let mut exp = UlerlExperiment::new(config, factory)?;
//! for stats in exp.run(3)? {
//!     println!("gen {} best {:?} ncentrs {}", stats.generation, stats.best_fitness, stats.ncentrs);
//! }
//! # Ok::<(), ulerl::UlerlError>(())
//! ```
//!
//! ## Layers
//!
//! - [`kernel`]: similarity, normalization, matrices, seeding, the controller network
//! - [`memory`]: codebook store and compressor
//! - [`evolution`]: SNES / xNES / BDNES and the dimensionality adapter
//! - [`rollout`]: environments, the rollout engine, the parallel evaluator
//! - [`highlevel`]: the experiment loop and snapshots

pub mod config;
pub mod error;
pub mod evolution;
pub mod highlevel;
pub mod kernel;
pub mod memory;
pub mod rollout;

// Re-exports for convenience
pub use config::ExperimentConfig;
pub use error::{Result, UlerlError};
pub use evolution::{DimensionalityAdapter, OptimizerKind, SearchStrategy};
pub use highlevel::{ExperimentSnapshot, GenerationStats, UlerlExperiment};
pub use kernel::{Controller, NetworkLayout};
pub use memory::{Code, Compressor, Encoding};
pub use rollout::{EnvBinding, EnvFactory, Environment, Frame, ParallelEvaluator, RolloutEngine};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressorConfig, CompressorKind, LearningRate, RunConfig};
    use crate::kernel::SimilarityMeasure;
    use crate::rollout::testing::ScriptedEnv;

    fn growing_config(seed: u64) -> ExperimentConfig {
        ExperimentConfig {
            run: RunConfig {
                max_steps: 8,
                workers: Some(2),
                random_seed: seed,
                ..Default::default()
            },
            compr: CompressorConfig {
                kind: CompressorKind::Growing {
                    initial_ncentrs: 1,
                    threshold: 0.97,
                    lrate: LearningRate::Variable,
                },
                similarity: SimilarityMeasure::Mse,
                downsample: [2, 2],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_same_seed_same_run() {
        let factory = ScriptedEnv::new([6, 6, 3], 4, 40).factory();
        let mut a = UlerlExperiment::new(growing_config(3), factory.clone()).unwrap();
        let mut b = UlerlExperiment::new(growing_config(3), factory).unwrap();
        a.run(3).unwrap();
        b.run(3).unwrap();
        assert_eq!(a.strategy().mean(), b.strategy().mean());
        assert_eq!(a.compressor().snapshot(), b.compressor().snapshot());
    }

    #[test]
    fn test_invariants_hold_across_growth() {
        let factory = ScriptedEnv::new([6, 6, 3], 4, 40).factory();
        let mut exp = UlerlExperiment::new(growing_config(8), factory).unwrap();
        let mut last = (exp.compressor().ncentrs(), exp.strategy().ndims());
        for stats in exp.run(4).unwrap() {
            assert!(stats.ncentrs >= last.0);
            assert!(stats.ndims >= last.1);
            assert_eq!(stats.resize.is_some(), stats.ncentrs > last.0);
            last = (stats.ncentrs, stats.ndims);
        }
        assert_eq!(exp.strategy().covariance_diagonal().len(), exp.strategy().ndims());
        assert_eq!(exp.controller().layout().ninputs(), exp.compressor().ncentrs());
        assert_eq!(exp.strategy().ndims(), exp.controller().nweights());
    }

    #[test]
    fn test_unknown_variant_is_config_error() {
        let err = "cmaes".parse::<OptimizerKind>().unwrap_err();
        assert!(matches!(err, UlerlError::UnknownVariant { .. }));
    }
}
