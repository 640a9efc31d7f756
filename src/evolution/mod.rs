//! Evolution layer: natural evolution strategies over controller weights,
//! and the adapter that resizes them when the codebook grows.
//!
//! - [`Snes`]: diagonal covariance.
//! - [`Xnes`]: full covariance through a square-root factor, or
//!   block-diagonal (BDNES) with one block per controller layer.
//! - [`DimensionalityAdapter`]: keeps the search distribution and the
//!   controller in lock-step with the codebook size.
//!
//! Every strategy is driven through [`SearchStrategy`]: sample a
//! population, evaluate it, tell the fitnesses back.
//!
//! # Example
//!
//! ```rust
//! use ulerl::config::OptimizerConfig;
//! use ulerl::evolution::{build_strategy, OptimizerKind, SearchStrategy};
//! use ulerl::kernel::{NetworkKind, NetworkLayout};
//!
//! let layout = NetworkLayout::from_parts(NetworkKind::FeedForward, 3, &[], 2).unwrap();
//! let config = OptimizerConfig { kind: OptimizerKind::Xnes, ..Default::default() };
//! let mut opt = build_strategy(&config, &layout, 1).unwrap();
//!
//! // Maximize -|x|²
//! for _ in 0..20 {
//!     opt.train_one_generation(&mut |pop| {
//!         Ok(pop.iter().map(|x| -x.iter().map(|v| v * v).sum::<f64>()).collect())
//!     }).unwrap();
//! }
//! assert!(opt.best().is_some());
//! ```

pub mod adapter;
pub mod snes;
mod state;
pub mod utilities;
pub mod xnes;

use std::fmt;
use std::str::FromStr;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OptimizerConfig;
use crate::error::{Result, UlerlError};
use crate::kernel::{component_rng, NetworkLayout, SquareMatrix};

pub use adapter::{check_consistency, DimensionalityAdapter, ResizeReport};
pub use snes::Snes;
pub use xnes::{Block, Xnes};

use state::NesState;

/// NES variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Snes,
    Xnes,
    #[default]
    Bdnes,
}

impl FromStr for OptimizerKind {
    type Err = UlerlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "snes" => Ok(OptimizerKind::Snes),
            "xnes" => Ok(OptimizerKind::Xnes),
            "bdnes" => Ok(OptimizerKind::Bdnes),
            _ => Err(UlerlError::UnknownVariant {
                kind: "optimizer",
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerKind::Snes => "snes",
            OptimizerKind::Xnes => "xnes",
            OptimizerKind::Bdnes => "bdnes",
        };
        f.write_str(name)
    }
}

/// Covariance representation inside a [`StrategySnapshot`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFactor {
    /// Per-dimension standard deviations
    Diagonal(Vec<f64>),
    /// Square-root factors of consecutive diagonal blocks
    Blocks(Vec<Block>),
}

impl StrategyFactor {
    pub fn ndims(&self) -> usize {
        match self {
            StrategyFactor::Diagonal(sigma) => sigma.len(),
            StrategyFactor::Blocks(blocks) => blocks.iter().map(|b| b.factor.n()).sum(),
        }
    }
}

/// Everything needed to resume a search where it stopped, random stream included.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub kind: OptimizerKind,
    pub mean: Vec<f64>,
    pub factor: StrategyFactor,
    pub rng: ChaCha8Rng,
    pub best: Option<(f64, Vec<f64>)>,
    /// Sentinel fitnesses are stored as `null`
    #[serde(with = "sentinel_as_null")]
    pub last_fitnesses: Vec<f64>,
    pub generation: u64,
}

/// JSON has no infinities: non-finite fitnesses round-trip as negative infinity.
mod sentinel_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], s: S) -> Result<S::Ok, S::Error> {
        let finite: Vec<Option<f64>> = values
            .iter()
            .map(|v| if v.is_finite() { Some(*v) } else { None })
            .collect();
        finite.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Option<f64>>::deserialize(d)?;
        Ok(values
            .into_iter()
            .map(|v| v.unwrap_or(f64::NEG_INFINITY))
            .collect())
    }
}

/// A search distribution over genotypes.
pub trait SearchStrategy: Send + fmt::Debug {
    fn kind(&self) -> OptimizerKind;

    fn ndims(&self) -> usize;

    fn population_size(&self) -> usize;

    fn mean(&self) -> &[f64];

    /// Full covariance matrix (materialized; mostly for inspection).
    fn covariance(&self) -> SquareMatrix;

    fn covariance_diagonal(&self) -> Vec<f64>;

    /// Draw a population and remember it until [`SearchStrategy::tell`].
    fn sample_population(&mut self) -> Vec<Vec<f64>>;

    /// Update the distribution from the fitnesses of the last sampled
    /// population, in the same order. Higher is better.
    fn tell(&mut self, fitnesses: &[f64]) -> Result<()>;

    /// Best finite fitness seen so far and its genotype.
    fn best(&self) -> Option<(f64, &[f64])>;

    fn last_fitnesses(&self) -> &[f64];

    fn generation(&self) -> u64;

    /// Insert `count` dimensions at `offset`: zero mean, unit variance,
    /// no correlation. Old entries keep their values and the random
    /// stream continues where it was.
    fn grow(&mut self, offset: usize, count: usize) -> Result<()>;

    fn rng(&self) -> &ChaCha8Rng;

    fn snapshot(&self) -> StrategySnapshot;

    /// Mean variance across dimensions; shrinks as the search converges.
    fn convergence(&self) -> f64 {
        let diag = self.covariance_diagonal();
        if diag.is_empty() {
            return 0.0;
        }
        diag.iter().sum::<f64>() / diag.len() as f64
    }

    /// Sample, evaluate with `fitness`, tell.
    fn train_one_generation(
        &mut self,
        fitness: &mut dyn FnMut(&[Vec<f64>]) -> Result<Vec<f64>>,
    ) -> Result<()> {
        let population = self.sample_population();
        let fits = fitness(&population)?;
        self.tell(&fits)
    }
}

/// Build a fresh strategy over the weights of `layout`.
///
/// The mean starts at zero and every dimension at `initial_sigma`. The
/// random stream is the `"optimizer"` stream of `run_seed`.
pub fn build_strategy(
    config: &OptimizerConfig,
    layout: &NetworkLayout,
    run_seed: u64,
) -> Result<Box<dyn SearchStrategy>> {
    let ndims = layout.nweights();
    let state = NesState::new(
        vec![0.0; ndims],
        component_rng(run_seed, "optimizer"),
        config.mean_lrate,
        config.sigma_lrate,
        config.population_size,
    );
    let sigma = config.initial_sigma;
    debug!(kind = %config.kind, ndims, popsize = state.popsize(), "building optimizer");

    let strategy: Box<dyn SearchStrategy> = match config.kind {
        OptimizerKind::Snes => Box::new(Snes::new(state, vec![sigma; ndims])),
        OptimizerKind::Xnes => {
            let block = Block {
                offset: 0,
                factor: SquareMatrix::scaled_identity(ndims, sigma),
            };
            Box::new(Xnes::new(OptimizerKind::Xnes, state, vec![block])?)
        }
        OptimizerKind::Bdnes => {
            let blocks = layout
                .layer_offsets()
                .into_iter()
                .zip(layout.nweights_per_layer())
                .map(|(offset, n)| Block {
                    offset,
                    factor: SquareMatrix::scaled_identity(n, sigma),
                })
                .collect();
            Box::new(Xnes::new(OptimizerKind::Bdnes, state, blocks)?)
        }
    };
    Ok(strategy)
}

/// Rebuild a strategy from a snapshot. Learning rates and the population
/// size policy come from `config`; everything else from the snapshot.
pub fn restore_strategy(
    config: &OptimizerConfig,
    snap: StrategySnapshot,
) -> Result<Box<dyn SearchStrategy>> {
    let ndims = snap.mean.len();
    if snap.factor.ndims() != ndims {
        return Err(UlerlError::ResizeInconsistency {
            mean: ndims,
            covariance: snap.factor.ndims(),
            controller: ndims,
        });
    }
    if let Some((_, best)) = &snap.best {
        if best.len() != ndims {
            return Err(UlerlError::ShapeMismatch {
                expected: ndims,
                got: best.len(),
            });
        }
    }

    let mut state = NesState::new(
        snap.mean,
        snap.rng,
        config.mean_lrate,
        config.sigma_lrate,
        config.population_size,
    );
    state.best = snap.best;
    state.last_fitnesses = snap.last_fitnesses;
    state.generation = snap.generation;

    let strategy: Box<dyn SearchStrategy> = match (snap.kind, snap.factor) {
        (OptimizerKind::Snes, StrategyFactor::Diagonal(sigma)) => Box::new(Snes::new(state, sigma)),
        (kind @ (OptimizerKind::Xnes | OptimizerKind::Bdnes), StrategyFactor::Blocks(blocks)) => {
            Box::new(Xnes::new(kind, state, blocks)?)
        }
        (kind, _) => {
            return Err(UlerlError::Config(format!(
                "snapshot covariance does not match optimizer `{}`",
                kind
            )))
        }
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::NetworkKind;

    fn layout() -> NetworkLayout {
        NetworkLayout::from_parts(NetworkKind::Recurrent, 3, &[2], 2).unwrap()
    }

    fn config(kind: OptimizerKind) -> OptimizerConfig {
        OptimizerConfig {
            kind,
            ..Default::default()
        }
    }

    fn sphere(pop: &[Vec<f64>]) -> Result<Vec<f64>> {
        Ok(pop
            .iter()
            .map(|x| -x.iter().map(|v| (v - 0.5).powi(2)).sum::<f64>())
            .collect())
    }

    const ALL: [OptimizerKind; 3] = [OptimizerKind::Snes, OptimizerKind::Xnes, OptimizerKind::Bdnes];

    #[test]
    fn test_kind_from_str() {
        assert_eq!("XNES".parse::<OptimizerKind>().unwrap(), OptimizerKind::Xnes);
        assert!(matches!(
            "cmaes".parse::<OptimizerKind>(),
            Err(UlerlError::UnknownVariant { kind: "optimizer", .. })
        ));
    }

    #[test]
    fn test_dimensions_match_layout() {
        let layout = layout();
        for kind in ALL {
            let opt = build_strategy(&config(kind), &layout, 0).unwrap();
            assert_eq!(opt.ndims(), layout.nweights());
            assert_eq!(opt.covariance_diagonal().len(), layout.nweights());
            assert_eq!(opt.covariance().n(), layout.nweights());
            assert_eq!(opt.population_size(), 4 + (3.0 * (layout.nweights() as f64).ln()) as usize);
        }
    }

    #[test]
    fn test_bdnes_blocks_follow_layers() {
        let layout = layout();
        let opt = build_strategy(&config(OptimizerKind::Bdnes), &layout, 0).unwrap();
        match opt.snapshot().factor {
            StrategyFactor::Blocks(blocks) => {
                let sizes: Vec<usize> = blocks.iter().map(|b| b.factor.n()).collect();
                assert_eq!(sizes, layout.nweights_per_layer());
            }
            other => panic!("unexpected factor {:?}", other),
        }
    }

    #[test]
    fn test_same_seed_same_search() {
        for kind in ALL {
            let mut a = build_strategy(&config(kind), &layout(), 5).unwrap();
            let mut b = build_strategy(&config(kind), &layout(), 5).unwrap();
            for _ in 0..3 {
                a.train_one_generation(&mut sphere).unwrap();
                b.train_one_generation(&mut sphere).unwrap();
            }
            assert_eq!(a.mean(), b.mean());
            assert_eq!(a.covariance_diagonal(), b.covariance_diagonal());
        }
    }

    #[test]
    fn test_search_improves_on_sphere() {
        for kind in ALL {
            let mut opt = build_strategy(&config(kind), &layout(), 3).unwrap();
            opt.train_one_generation(&mut sphere).unwrap();
            let first = opt.best().unwrap().0;
            for _ in 0..60 {
                opt.train_one_generation(&mut sphere).unwrap();
            }
            assert!(opt.best().unwrap().0 > first, "{} did not improve", kind);
            assert_eq!(opt.generation(), 61);
        }
    }

    #[test]
    fn test_tell_checks_population() {
        let mut opt = build_strategy(&config(OptimizerKind::Snes), &layout(), 0).unwrap();
        assert!(opt.tell(&[1.0]).is_err());
        let pop = opt.sample_population();
        assert!(matches!(
            opt.tell(&vec![0.0; pop.len() + 1]),
            Err(UlerlError::ShapeMismatch { .. })
        ));
        // Population survives a failed tell.
        assert!(opt.tell(&vec![0.0; pop.len()]).is_ok());
    }

    #[test]
    fn test_sentinel_fitness_never_best() {
        let mut opt = build_strategy(&config(OptimizerKind::Xnes), &layout(), 0).unwrap();
        let pop = opt.sample_population();
        let mut fits = vec![f64::NEG_INFINITY; pop.len()];
        opt.tell(&fits).unwrap();
        assert!(opt.best().is_none());

        let pop = opt.sample_population();
        fits = vec![f64::NEG_INFINITY; pop.len()];
        fits[2] = 1.5;
        opt.tell(&fits).unwrap();
        assert_eq!(opt.best().unwrap().0, 1.5);
        assert_eq!(opt.best().unwrap().1, pop[2].as_slice());
    }

    #[test]
    fn test_grow_preserves_distribution() {
        let layout = layout();
        let offset = layout.input_block_end();
        for kind in ALL {
            let mut opt = build_strategy(&config(kind), &layout, 9).unwrap();
            for _ in 0..4 {
                opt.train_one_generation(&mut sphere).unwrap();
            }
            let old_mean = opt.mean().to_vec();
            let old_cov = opt.covariance();
            let old_best = opt.best().unwrap().1.to_vec();
            let rng_pos = opt.rng().get_word_pos();
            let n = old_mean.len();
            let count = 2 * layout.input_fan_out();

            opt.grow(offset, count).unwrap();
            let cov = opt.covariance();

            assert_eq!(opt.ndims(), n + count);
            assert_eq!(cov.remove(offset, count), old_cov);
            for k in offset..offset + count {
                assert_eq!(opt.mean()[k], 0.0);
                assert_eq!(cov.get(k, k), 1.0);
                for j in (0..n + count).filter(|&j| j != k) {
                    assert_eq!(cov.get(k, j), 0.0);
                }
            }
            let (head, tail) = opt.mean().split_at(offset);
            assert_eq!(head, &old_mean[..offset]);
            assert_eq!(&tail[count..], &old_mean[offset..]);
            assert_eq!(opt.best().unwrap().1.len(), n + count);
            assert_eq!(&opt.best().unwrap().1[..offset], &old_best[..offset]);
            assert_eq!(opt.rng().get_word_pos(), rng_pos);
        }
    }

    #[test]
    fn test_grow_refused_mid_generation() {
        let mut opt = build_strategy(&config(OptimizerKind::Bdnes), &layout(), 0).unwrap();
        opt.sample_population();
        assert!(opt.grow(1, 1).is_err());
    }

    #[test]
    fn test_snapshot_restore_continues_identically() {
        for kind in ALL {
            let cfg = config(kind);
            let mut opt = build_strategy(&cfg, &layout(), 2).unwrap();
            opt.train_one_generation(&mut sphere).unwrap();

            let json = serde_json::to_string(&opt.snapshot()).unwrap();
            let snap: StrategySnapshot = serde_json::from_str(&json).unwrap();
            let mut restored = restore_strategy(&cfg, snap).unwrap();

            assert_eq!(opt.sample_population(), restored.sample_population());
            assert_eq!(restored.generation(), 1);
        }
    }

    #[test]
    fn test_snapshot_keeps_sentinel_fitnesses() {
        let mut opt = build_strategy(&config(OptimizerKind::Snes), &layout(), 0).unwrap();
        let pop = opt.sample_population();
        let mut fits = vec![1.0; pop.len()];
        fits[0] = f64::NEG_INFINITY;
        opt.tell(&fits).unwrap();

        let json = serde_json::to_string(&opt.snapshot()).unwrap();
        let snap: StrategySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap.last_fitnesses, fits);
    }

    #[test]
    fn test_restore_rejects_inconsistent_snapshot() {
        let cfg = config(OptimizerKind::Snes);
        let opt = build_strategy(&cfg, &layout(), 0).unwrap();
        let mut snap = opt.snapshot();
        snap.mean.push(0.0);
        assert!(matches!(
            restore_strategy(&cfg, snap),
            Err(UlerlError::ResizeInconsistency { .. })
        ));
    }
}
