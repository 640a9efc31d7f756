//! Codebook Store: prototypes and their adaptation statistics.
//!
//! Prototypes live in one row-major buffer, prototype `i` at
//! `prototypes[i * dims .. (i + 1) * dims]`. The index is the identity:
//! prototypes are updated in place or appended, never removed or
//! reordered.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UlerlError};
use crate::kernel::SimilarityMeasure;

/// Serializable snapshot of a [`CodebookStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CodebookSnapshot {
    pub dims: usize,
    /// Flat row-major: ncentrs rows × dims columns.
    pub prototypes: Vec<f64>,
    pub usage: Vec<u64>,
    pub rounds: u64,
}

/// Ordered prototypes plus per-prototype usage counts.
#[derive(Clone, Debug)]
pub struct CodebookStore {
    dims: usize,
    prototypes: Vec<f64>,
    usage: Vec<u64>,
    /// Training rounds absorbed so far (drives decaying learning rates).
    rounds: u64,
}

impl CodebookStore {
    /// Empty store for prototypes of `dims` values.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            prototypes: Vec::new(),
            usage: Vec::new(),
            rounds: 0,
        }
    }

    /// Store with `n` prototypes drawn uniformly from `vrange`.
    pub fn random(dims: usize, n: usize, vrange: (f64, f64), rng: &mut ChaCha8Rng) -> Self {
        let (lo, hi) = vrange;
        let prototypes = (0..n * dims).map(|_| rng.gen_range(lo..hi)).collect();
        Self {
            dims,
            prototypes,
            usage: vec![0; n],
            rounds: 0,
        }
    }

    // --- Accessors ---

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn ncentrs(&self) -> usize {
        self.usage.len()
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn usage(&self, index: usize) -> u64 {
        self.usage[index]
    }

    pub fn prototype(&self, index: usize) -> &[f64] {
        &self.prototypes[index * self.dims..(index + 1) * self.dims]
    }

    pub fn prototypes(&self) -> impl Iterator<Item = &[f64]> {
        self.prototypes.chunks_exact(self.dims.max(1))
    }

    // --- Queries ---

    /// Similarity of `x` to every prototype, in index order.
    pub fn similarities(&self, x: &[f64], measure: SimilarityMeasure) -> Vec<f64> {
        self.prototypes().map(|p| measure.compute(x, p)).collect()
    }

    /// Most similar prototype and its similarity. Ties go to the lowest index.
    pub fn most_similar(&self, x: &[f64], measure: SimilarityMeasure) -> Option<(usize, f64)> {
        self.prototypes()
            .map(|p| measure.compute(x, p))
            .enumerate()
            .fold(None, |best, (i, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((i, s)),
            })
    }

    // --- Mutation (between generations only) ---

    /// Append a prototype and return its index.
    pub fn push(&mut self, prototype: &[f64]) -> Result<usize> {
        if prototype.len() != self.dims {
            return Err(UlerlError::ShapeMismatch {
                expected: self.dims,
                got: prototype.len(),
            });
        }
        self.prototypes.extend_from_slice(prototype);
        self.usage.push(1);
        Ok(self.usage.len() - 1)
    }

    /// Move prototype `index` toward `sample`: `p = p * (1 - rate) + sample * rate`.
    pub fn absorb(&mut self, index: usize, sample: &[f64], rate: f64) {
        assert_eq!(sample.len(), self.dims, "Dimension mismatch in absorb");
        let base = index * self.dims;
        for (p, &s) in self.prototypes[base..base + self.dims].iter_mut().zip(sample) {
            *p = *p * (1.0 - rate) + s * rate;
        }
        self.usage[index] += 1;
    }

    pub(crate) fn finish_round(&mut self) {
        self.rounds += 1;
    }

    /// Blend every prototype toward `base`: `p = base * proportion + p * (1 - proportion)`.
    pub fn seed_from(&mut self, base: &[f64], proportion: f64) -> Result<()> {
        if base.len() != self.dims {
            return Err(UlerlError::ShapeMismatch {
                expected: self.dims,
                got: base.len(),
            });
        }
        for proto in self.prototypes.chunks_exact_mut(self.dims.max(1)) {
            for (p, &b) in proto.iter_mut().zip(base) {
                *p = b * proportion + *p * (1.0 - proportion);
            }
        }
        Ok(())
    }

    // --- Persistence ---

    pub fn snapshot(&self) -> CodebookSnapshot {
        CodebookSnapshot {
            dims: self.dims,
            prototypes: self.prototypes.clone(),
            usage: self.usage.clone(),
            rounds: self.rounds,
        }
    }

    /// Restore from a snapshot, checking that its buffers agree.
    pub fn from_snapshot(snap: CodebookSnapshot) -> Result<Self> {
        if snap.prototypes.len() != snap.usage.len() * snap.dims {
            return Err(UlerlError::ShapeMismatch {
                expected: snap.usage.len() * snap.dims,
                got: snap.prototypes.len(),
            });
        }
        if snap.usage.is_empty() {
            return Err(UlerlError::Config("codebook snapshot has no prototypes".into()));
        }
        Ok(Self {
            dims: snap.dims,
            prototypes: snap.prototypes,
            usage: snap.usage,
            rounds: snap.rounds,
        })
    }
}
