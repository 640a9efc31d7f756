//! Observation compressor: online vector quantization.
//!
//! [`Compressor::encode`] and [`Compressor::novelty`] take `&self` and
//! never touch the codebook, so any number of evaluation workers can share
//! one compressor while rollouts are in flight. [`Compressor::enqueue`]
//! and [`Compressor::train`] take `&mut self`; the borrow checker keeps
//! them out of the evaluation phase.
//!
//! # Usage
//!
//! ```rust
//! use ulerl::config::{CompressorConfig, CompressorKind, LearningRate};
//! use ulerl::memory::Compressor;
//!
//! let config = CompressorConfig {
//!     kind: CompressorKind::Growing {
//!         initial_ncentrs: 1,
//!         threshold: 0.9,
//!         lrate: LearningRate::Constant { rate: 0.5 },
//!     },
//!     obs_range: (0.0, 1.0),
//!     ..Default::default()
//! };
//! let mut compr = Compressor::new(&config, (2, 2), 42).unwrap();
//!
//! let obs = [1.0, 0.0, 0.0, 1.0];
//! let code = compr.encode(&obs).unwrap();
//! let novelty = compr.novelty(&obs, &code).unwrap();
//! assert!(novelty >= 0.0);
//!
//! compr.enqueue(&obs).unwrap();
//! compr.train().unwrap();
//! assert!(compr.train_set().is_empty());
//! ```

use std::fmt;

use tracing::{debug, info};

use crate::config::{CompressorConfig, CompressorKind, LearningRate};
use crate::error::{Result, UlerlError};
use crate::kernel::{component_rng, downsampled_shape, feature_scaling, SimilarityMeasure};

use super::code::{Code, Encoding};
use super::codebook::{CodebookSnapshot, CodebookStore};

/// Codebook update policy, chosen once from [`CompressorKind`].
pub trait UpdateRule: Send + Sync + fmt::Debug {
    /// Fold one normalized sample into the codebook.
    fn absorb(&self, codebook: &mut CodebookStore, sample: &[f64]) -> Result<()>;

    /// Whether this rule can add prototypes.
    fn grows(&self) -> bool;
}

/// Fixed-size VQ: move the nearest prototype toward the sample.
#[derive(Debug)]
pub struct FixedUpdate {
    similarity: SimilarityMeasure,
    lrate: LearningRate,
}

impl UpdateRule for FixedUpdate {
    fn absorb(&self, codebook: &mut CodebookStore, sample: &[f64]) -> Result<()> {
        if let Some((index, _)) = codebook.most_similar(sample, self.similarity) {
            let rate = self.lrate.rate(codebook.usage(index), codebook.rounds());
            codebook.absorb(index, sample, rate);
        }
        Ok(())
    }

    fn grows(&self) -> bool {
        false
    }
}

/// Incremental dictionary: samples below `threshold` similarity become
/// new prototypes, the rest are merged into their nearest prototype.
#[derive(Debug)]
pub struct GrowingUpdate {
    similarity: SimilarityMeasure,
    threshold: f64,
    lrate: LearningRate,
}

impl UpdateRule for GrowingUpdate {
    fn absorb(&self, codebook: &mut CodebookStore, sample: &[f64]) -> Result<()> {
        match codebook.most_similar(sample, self.similarity) {
            Some((index, simil)) if simil >= self.threshold => {
                let rate = self.lrate.rate(codebook.usage(index), codebook.rounds());
                codebook.absorb(index, sample, rate);
            }
            _ => {
                codebook.push(sample)?;
            }
        }
        Ok(())
    }

    fn grows(&self) -> bool {
        true
    }
}

fn build_rule(config: &CompressorConfig) -> Box<dyn UpdateRule> {
    match config.kind {
        CompressorKind::Fixed { lrate, .. } => Box::new(FixedUpdate {
            similarity: config.similarity,
            lrate,
        }),
        CompressorKind::Growing {
            threshold, lrate, ..
        } => Box::new(GrowingUpdate {
            similarity: config.similarity,
            threshold,
            lrate,
        }),
    }
}

/// Outcome of one [`Compressor::train`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainReport {
    pub samples: usize,
    pub ncentrs_before: usize,
    pub ncentrs_after: usize,
}

impl TrainReport {
    pub fn grew_by(&self) -> usize {
        self.ncentrs_after - self.ncentrs_before
    }
}

/// Encodes observations against a codebook, scores their novelty and
/// curates the samples the codebook learns from.
#[derive(Debug)]
pub struct Compressor {
    config: CompressorConfig,
    input_shape: (usize, usize),
    codebook: CodebookStore,
    rule: Box<dyn UpdateRule>,
    train_set: Vec<Vec<f64>>,
}

impl Compressor {
    /// Build a compressor for raw frames of `frame_shape` `(rows, cols)`.
    ///
    /// Prototypes have the downsampled size and start uniformly random in
    /// the working range, drawn from the `"compressor"` stream of `run_seed`.
    pub fn new(config: &CompressorConfig, frame_shape: (usize, usize), run_seed: u64) -> Result<Self> {
        config.validate()?;
        let input_shape = downsampled_shape(frame_shape, config.downsample)?;
        let dims = input_shape.0 * input_shape.1;

        let mut rng = component_rng(run_seed, "compressor");
        let codebook =
            CodebookStore::random(dims, config.kind.initial_ncentrs(), config.vrange, &mut rng);

        Ok(Self {
            config: config.clone(),
            input_shape,
            codebook,
            rule: build_rule(config),
            train_set: Vec::new(),
        })
    }

    // --- Accessors ---

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Downsampled `(rows, cols)` every observation must have.
    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    pub fn dims(&self) -> usize {
        self.codebook.dims()
    }

    pub fn ncentrs(&self) -> usize {
        self.codebook.ncentrs()
    }

    pub fn ntrains(&self) -> u64 {
        self.codebook.rounds()
    }

    pub fn encoding(&self) -> Encoding {
        self.config.encoding
    }

    pub fn grows(&self) -> bool {
        self.rule.grows()
    }

    pub fn codebook(&self) -> &CodebookStore {
        &self.codebook
    }

    /// Normalized samples waiting for the next [`Compressor::train`].
    pub fn train_set(&self) -> &[Vec<f64>] {
        &self.train_set
    }

    // --- Read-only path ---

    /// Scale a downsampled observation into the working range.
    pub fn normalize(&self, observation: &[f64]) -> Result<Vec<f64>> {
        if observation.len() != self.dims() {
            return Err(UlerlError::ShapeMismatch {
                expected: self.dims(),
                got: observation.len(),
            });
        }
        Ok(feature_scaling(
            observation,
            self.config.obs_range,
            self.config.vrange,
        ))
    }

    /// Encode a downsampled observation.
    pub fn encode(&self, observation: &[f64]) -> Result<Code> {
        let x = self.normalize(observation)?;
        Ok(self.encode_normalized(&x))
    }

    /// Encode an already normalized observation.
    pub fn encode_normalized(&self, x: &[f64]) -> Code {
        let measure = self.config.similarity;
        let len = self.ncentrs();
        match self.config.encoding {
            Encoding::MostSimilar => {
                let (index, _) = self
                    .codebook
                    .most_similar(x, measure)
                    .unwrap_or((0, f64::NEG_INFINITY));
                Code::Index { index, len }
            }
            Encoding::Ensemble => Code::Dense(self.codebook.similarities(x, measure)),
            Encoding::EnsembleNorm => {
                let simils = self.codebook.similarities(x, measure);
                let total: f64 = simils.iter().map(|s| s.abs()).sum();
                if total < 1e-12 {
                    Code::Dense(vec![0.0; len])
                } else {
                    Code::Dense(simils.iter().map(|s| s / total).collect())
                }
            }
            Encoding::Sparse { threshold } => {
                let entries = self
                    .codebook
                    .similarities(x, measure)
                    .into_iter()
                    .enumerate()
                    .filter(|&(_, s)| s >= threshold && s != 0.0)
                    .collect();
                Code::Sparse { len, entries }
            }
        }
    }

    /// Codebook reconstruction of a code.
    ///
    /// An index reconstructs to its prototype; weighted codes reconstruct
    /// to the weighted average of the prototypes they name, or to zeros
    /// when the weights sum to zero.
    pub fn reconstruction(&self, code: &Code) -> Result<Vec<f64>> {
        if code.len() != self.ncentrs() {
            return Err(UlerlError::ShapeMismatch {
                expected: self.ncentrs(),
                got: code.len(),
            });
        }
        code.validate()?;
        if let Code::Index { index, .. } = code {
            return Ok(self.codebook.prototype(*index).to_vec());
        }

        let weights = code.nonzero();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        let mut rec = vec![0.0; self.dims()];
        if total.abs() < 1e-12 {
            return Ok(rec);
        }
        for (i, w) in weights {
            let scale = w / total;
            for (r, p) in rec.iter_mut().zip(self.codebook.prototype(i)) {
                *r += p * scale;
            }
        }
        Ok(rec)
    }

    /// Reconstruction error of `observation` under `code`. Higher = less
    /// well represented by the current codebook.
    pub fn novelty(&self, observation: &[f64], code: &Code) -> Result<f64> {
        let x = self.normalize(observation)?;
        let rec = self.reconstruction(code)?;
        Ok(self.config.novelty.compute(&x, &rec))
    }

    // --- Mutating path ---

    /// Queue one raw observation for the next training round.
    pub fn enqueue(&mut self, observation: &[f64]) -> Result<()> {
        let x = self.normalize(observation)?;
        self.train_set.push(x);
        Ok(())
    }

    /// Fold the queued samples into the codebook and clear the queue.
    ///
    /// The queue is emptied before training starts, whatever the outcome.
    /// An empty queue leaves the codebook untouched.
    pub fn train(&mut self) -> Result<TrainReport> {
        let samples = std::mem::take(&mut self.train_set);
        let before = self.ncentrs();
        if samples.is_empty() {
            debug!("compressor train skipped: no samples");
            return Ok(TrainReport {
                samples: 0,
                ncentrs_before: before,
                ncentrs_after: before,
            });
        }

        for sample in &samples {
            self.rule.absorb(&mut self.codebook, sample)?;
        }
        self.codebook.finish_round();

        let after = self.ncentrs();
        if after < before {
            return Err(UlerlError::Shrink {
                old: before,
                new: after,
            });
        }
        if after > before {
            info!(
                before,
                after,
                samples = samples.len(),
                "codebook grew"
            );
        } else {
            debug!(samples = samples.len(), ncentrs = after, "compressor trained");
        }

        Ok(TrainReport {
            samples: samples.len(),
            ncentrs_before: before,
            ncentrs_after: after,
        })
    }

    /// Bias every prototype toward a reference observation (e.g. the
    /// environment's reset frame).
    pub fn seed_prototypes(&mut self, reference: &[f64], proportion: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&proportion) {
            return Err(UlerlError::Config(format!(
                "seed proportion must be in [0, 1], got {}",
                proportion
            )));
        }
        let x = self.normalize(reference)?;
        self.codebook.seed_from(&x, proportion)
    }

    // --- Persistence ---

    pub fn snapshot(&self) -> CodebookSnapshot {
        self.codebook.snapshot()
    }

    /// Replace the codebook with a snapshot of matching dimensionality.
    pub fn restore(&mut self, snap: CodebookSnapshot) -> Result<()> {
        if snap.dims != self.dims() {
            return Err(UlerlError::ShapeMismatch {
                expected: self.dims(),
                got: snap.dims,
            });
        }
        self.codebook = CodebookStore::from_snapshot(snap)?;
        self.train_set.clear();
        Ok(())
    }
}
