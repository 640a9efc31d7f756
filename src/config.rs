//! Experiment configuration.
//!
//! Every component is built from its own section, passed by reference at
//! construction. Nothing reaches back into a shared map afterwards, so a
//! running experiment cannot observe configuration changes.
//!
//! # Example
//!
//! ```rust
//! use ulerl::config::ExperimentConfig;
//!
//! let config = ExperimentConfig::from_json_str(r#"{
//!     "env": { "name": "Qbert" },
//!     "run": { "max_steps": 100, "skip_frames": 5 },
//!     "compr": {
//!         "kind": { "type": "growing", "initial_ncentrs": 8, "threshold": 0.95 },
//!         "encoding": { "type": "ensemble_norm" },
//!         "downsample": [30, 20]
//!     }
//! }"#).unwrap();
//! assert_eq!(config.run.skip_frames, 5);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UlerlError};
use crate::evolution::OptimizerKind;
use crate::kernel::{Activation, NetworkKind, NoveltyMetric, SimilarityMeasure};
use crate::memory::Encoding;
use crate::rollout::{Aggregation, DivergencePolicy, EvaluationMode, Preprocessing, SkipPolicy};

/// Full experiment description.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Generation loop and rollout settings
    #[serde(default)]
    pub run: RunConfig,

    /// Controller network
    #[serde(default)]
    pub net: NetConfig,

    /// Evolution strategy
    #[serde(default)]
    pub opt: OptimizerConfig,

    /// Observation compressor
    #[serde(default)]
    pub compr: CompressorConfig,

    /// Environment binding
    #[serde(default)]
    pub env: EnvConfig,
}

impl ExperimentConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every section for values no component can work with.
    pub fn validate(&self) -> Result<()> {
        self.run.validate()?;
        self.opt.validate()?;
        self.compr.validate()?;
        Ok(())
    }
}

/// Generation loop and rollout settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Action selections per episode (each followed by `skip_frames` micro-steps)
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Generations run by `run()` when no explicit count is given
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,

    /// Extra micro-steps after every selected action
    #[serde(default)]
    pub skip_frames: usize,

    /// What the environment receives during skipped micro-steps
    #[serde(default)]
    pub skip_policy: SkipPolicy,

    /// How the observations of one action + its skipped steps become one
    #[serde(default)]
    pub aggregation: Aggregation,

    /// Sequential or parallel fitness evaluation
    #[serde(default)]
    pub evaluation: EvaluationMode,

    /// Worker pool size for parallel evaluation (defaults to available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Seed from which every component stream is derived
    #[serde(default)]
    pub random_seed: u64,

    /// Stop `run()` once the best fitness reaches this value
    #[serde(default)]
    pub target_fitness: Option<f64>,

    /// What happens to a rollout whose controller output goes non-finite
    #[serde(default)]
    pub divergence: DivergencePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_generations: default_max_generations(),
            skip_frames: 0,
            skip_policy: SkipPolicy::default(),
            aggregation: Aggregation::default(),
            evaluation: EvaluationMode::default(),
            workers: None,
            random_seed: 0,
            target_fitness: None,
            divergence: DivergencePolicy::default(),
        }
    }
}

impl RunConfig {
    fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(UlerlError::Config("max_steps must be at least 1".into()));
        }
        if self.workers == Some(0) {
            return Err(UlerlError::Config("workers must be at least 1".into()));
        }
        if let Some(target) = self.target_fitness {
            if target.is_nan() {
                return Err(UlerlError::Config("target_fitness is NaN".into()));
            }
        }
        Ok(())
    }

    /// Worker pool size, falling back to the machine's available parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

fn default_max_steps() -> usize {
    100
}

fn default_max_generations() -> usize {
    10
}

/// Controller network shape (input and output widths come from the
/// compressor and the environment).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(default)]
    pub kind: NetworkKind,

    #[serde(default)]
    pub hidden_layers: Vec<usize>,

    #[serde(default)]
    pub activation: Activation,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            kind: NetworkKind::Recurrent,
            hidden_layers: Vec::new(),
            activation: Activation::Logistic,
        }
    }
}

/// Natural evolution strategy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub kind: OptimizerKind,

    /// Fixed population size; `None` uses `4 + floor(3 ln d)` for the current dimension
    #[serde(default)]
    pub population_size: Option<usize>,

    /// Mean learning rate
    #[serde(default = "default_mean_lrate")]
    pub mean_lrate: f64,

    /// Override for the covariance (or sigma) learning rate
    #[serde(default)]
    pub sigma_lrate: Option<f64>,

    /// Initial standard deviation of every search dimension
    #[serde(default = "default_initial_sigma")]
    pub initial_sigma: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::default(),
            population_size: None,
            mean_lrate: default_mean_lrate(),
            sigma_lrate: None,
            initial_sigma: default_initial_sigma(),
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        if let Some(popsize) = self.population_size {
            if popsize < 2 {
                return Err(UlerlError::Config(format!(
                    "population_size must be at least 2, got {}",
                    popsize
                )));
            }
        }
        check_rate("mean_lrate", self.mean_lrate)?;
        if let Some(rate) = self.sigma_lrate {
            check_rate("sigma_lrate", rate)?;
        }
        if !(self.initial_sigma.is_finite() && self.initial_sigma > 0.0) {
            return Err(UlerlError::Config(format!(
                "initial_sigma must be positive, got {}",
                self.initial_sigma
            )));
        }
        Ok(())
    }
}

fn default_mean_lrate() -> f64 {
    1.0
}

fn default_initial_sigma() -> f64 {
    1.0
}

/// Learning-rate policy for moving a prototype toward a sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningRate {
    /// Same rate for every update
    Constant { rate: f64 },
    /// `1 / (usage + 1)`: each prototype tracks the running mean of its samples
    Variable,
    /// `min + (1 - min) * exp(-decay * ntrains)`
    Decaying { min: f64, decay: f64 },
}

impl Default for LearningRate {
    fn default() -> Self {
        LearningRate::Constant { rate: 0.3 }
    }
}

impl LearningRate {
    /// Rate for a prototype used `usage` times, after `ntrains` training rounds.
    pub fn rate(&self, usage: u64, ntrains: u64) -> f64 {
        match *self {
            LearningRate::Constant { rate } => rate,
            LearningRate::Variable => 1.0 / (usage as f64 + 1.0),
            LearningRate::Decaying { min, decay } => {
                min + (1.0 - min) * (-decay * ntrains as f64).exp()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            LearningRate::Constant { rate } => check_rate("lrate", rate),
            LearningRate::Variable => Ok(()),
            LearningRate::Decaying { min, decay } => {
                check_rate("lrate min", min)?;
                if !(decay.is_finite() && decay >= 0.0) {
                    return Err(UlerlError::Config(format!(
                        "lrate decay must be non-negative, got {}",
                        decay
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Codebook update family.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompressorKind {
    /// Fixed number of prototypes adjusted toward their nearest samples
    Fixed {
        ncentrs: usize,
        #[serde(default)]
        lrate: LearningRate,
    },
    /// Samples less similar than `threshold` to every prototype become new prototypes
    Growing {
        #[serde(default = "default_initial_ncentrs")]
        initial_ncentrs: usize,
        threshold: f64,
        #[serde(default)]
        lrate: LearningRate,
    },
}

impl Default for CompressorKind {
    fn default() -> Self {
        CompressorKind::Fixed {
            ncentrs: 8,
            lrate: LearningRate::default(),
        }
    }
}

impl CompressorKind {
    /// Prototypes present at construction.
    pub fn initial_ncentrs(&self) -> usize {
        match *self {
            CompressorKind::Fixed { ncentrs, .. } => ncentrs,
            CompressorKind::Growing {
                initial_ncentrs, ..
            } => initial_ncentrs,
        }
    }

    pub fn lrate(&self) -> LearningRate {
        match *self {
            CompressorKind::Fixed { lrate, .. } | CompressorKind::Growing { lrate, .. } => lrate,
        }
    }
}

fn default_initial_ncentrs() -> usize {
    1
}

/// Observation compressor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressorConfig {
    #[serde(default)]
    pub kind: CompressorKind,

    #[serde(default)]
    pub encoding: Encoding,

    /// Similarity used to pick the nearest prototype and build codes
    #[serde(default)]
    pub similarity: SimilarityMeasure,

    /// Reconstruction error used as novelty
    #[serde(default)]
    pub novelty: NoveltyMetric,

    /// Value range of raw observations
    #[serde(default = "default_obs_range")]
    pub obs_range: (f64, f64),

    /// Working value range of prototypes
    #[serde(default = "default_vrange")]
    pub vrange: (f64, f64),

    /// Integer stride per axis: `[rows, cols]`
    #[serde(default = "default_downsample")]
    pub downsample: [usize; 2],

    /// Blend initial prototypes with the reset observation by this proportion
    #[serde(default)]
    pub seed_proportion: Option<f64>,

    #[serde(default)]
    pub preproc: Preprocessing,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            kind: CompressorKind::default(),
            encoding: Encoding::default(),
            similarity: SimilarityMeasure::default(),
            novelty: NoveltyMetric::default(),
            obs_range: default_obs_range(),
            vrange: default_vrange(),
            downsample: default_downsample(),
            seed_proportion: None,
            preproc: Preprocessing::default(),
        }
    }
}

impl CompressorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.downsample.iter().any(|&r| r < 1) {
            return Err(UlerlError::Config(format!(
                "Only downward scaling: downsample factors must be >= 1, got {:?}",
                self.downsample
            )));
        }
        check_range("obs_range", self.obs_range)?;
        check_range("vrange", self.vrange)?;
        match self.kind {
            CompressorKind::Fixed { ncentrs, .. } if ncentrs == 0 => {
                return Err(UlerlError::Config(
                    "fixed compressor needs at least one prototype".into(),
                ));
            }
            CompressorKind::Growing { threshold, .. } if !threshold.is_finite() => {
                return Err(UlerlError::Config(format!(
                    "growth threshold must be finite, got {}",
                    threshold
                )));
            }
            _ => {}
        }
        if self.kind.initial_ncentrs() == 0 {
            return Err(UlerlError::Config(
                "compressor needs at least one initial prototype".into(),
            ));
        }
        self.kind.lrate().validate()?;
        if let Encoding::Sparse { threshold } = self.encoding {
            if !threshold.is_finite() {
                return Err(UlerlError::Config(format!(
                    "sparse encoding threshold must be finite, got {}",
                    threshold
                )));
            }
        }
        if let Some(proportion) = self.seed_proportion {
            if !(0.0..=1.0).contains(&proportion) {
                return Err(UlerlError::Config(format!(
                    "seed_proportion must be in [0, 1], got {}",
                    proportion
                )));
            }
        }
        Ok(())
    }
}

fn default_obs_range() -> (f64, f64) {
    (0.0, 255.0)
}

fn default_vrange() -> (f64, f64) {
    (0.0, 1.0)
}

fn default_downsample() -> [usize; 2] {
    [1, 1]
}

/// Environment identity handed to the environment factory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnvConfig {
    #[serde(default)]
    pub name: String,
}

fn check_rate(name: &str, rate: f64) -> Result<()> {
    if rate > 0.0 && rate <= 1.0 {
        Ok(())
    } else {
        Err(UlerlError::Config(format!(
            "{} must be in (0, 1], got {}",
            name, rate
        )))
    }
}

fn check_range(name: &str, (lo, hi): (f64, f64)) -> Result<()> {
    if lo.is_finite() && hi.is_finite() && lo < hi {
        Ok(())
    } else {
        Err(UlerlError::Config(format!(
            "{} must be an increasing finite pair, got ({}, {})",
            name, lo, hi
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ExperimentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_tagged_variants() {
        let config = ExperimentConfig::from_json_str(
            r#"{
                "opt": { "kind": "xnes", "population_size": 6 },
                "run": { "evaluation": "sequential_multi", "aggregation": "average" },
                "compr": {
                    "kind": { "type": "growing", "initial_ncentrs": 3, "threshold": 0.9,
                              "lrate": { "type": "variable" } },
                    "encoding": { "type": "sparse", "threshold": 0.5 },
                    "similarity": "mse"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.opt.kind, OptimizerKind::Xnes);
        assert_eq!(config.run.evaluation, EvaluationMode::SequentialMulti);
        assert_eq!(config.run.aggregation, Aggregation::Average);
        assert_eq!(config.compr.kind.initial_ncentrs(), 3);
        assert_eq!(config.compr.encoding, Encoding::Sparse { threshold: 0.5 });
        assert_eq!(config.compr.similarity, SimilarityMeasure::Mse);
    }

    #[test]
    fn test_unknown_variant_rejected() {
        let err = ExperimentConfig::from_json_str(r#"{ "opt": { "kind": "cmaes" } }"#);
        assert!(matches!(err, Err(UlerlError::Json(_))));
    }

    #[test]
    fn test_downsample_below_one_rejected() {
        let err = ExperimentConfig::from_json_str(r#"{ "compr": { "downsample": [0, 2] } }"#);
        assert!(matches!(err, Err(UlerlError::Config(_))));
    }

    #[test]
    fn test_learning_rate_policies() {
        assert_eq!(LearningRate::Constant { rate: 0.3 }.rate(10, 10), 0.3);
        assert_eq!(LearningRate::Variable.rate(0, 0), 1.0);
        assert_eq!(LearningRate::Variable.rate(3, 0), 0.25);
        let decaying = LearningRate::Decaying { min: 0.1, decay: 1.0 };
        assert!((decaying.rate(0, 0) - 1.0).abs() < 1e-12);
        assert!(decaying.rate(0, 50) < 0.1 + 1e-9);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = ExperimentConfig::default();
        config.run.workers = Some(0);
        assert!(config.validate().is_err());
    }
}
