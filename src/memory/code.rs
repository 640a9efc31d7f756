//! Codes: observations expressed against the current codebook.
//!
//! A code's length is the number of prototypes at encode time. The
//! codebook can grow between generations, so codes are only comparable
//! within the generation that produced them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, UlerlError};

/// Encoding scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Encoding {
    /// Index of the most similar prototype (one-hot when densified)
    #[default]
    MostSimilar,
    /// Similarity to every prototype
    Ensemble,
    /// Similarities scaled to sum to 1 in absolute value
    EnsembleNorm,
    /// Only similarities at or above `threshold` are kept
    Sparse { threshold: f64 },
}

/// An encoded observation.
#[derive(Clone, Debug, PartialEq)]
pub enum Code {
    /// Nearest prototype out of `len`
    Index { index: usize, len: usize },
    /// One weight per prototype
    Dense(Vec<f64>),
    /// Non-zero weights only, sorted by prototype index
    Sparse { len: usize, entries: Vec<(usize, f64)> },
}

impl Code {
    /// Number of prototypes the code was computed against.
    pub fn len(&self) -> usize {
        match self {
            Code::Index { len, .. } | Code::Sparse { len, .. } => *len,
            Code::Dense(weights) => weights.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every prototype index must lie below `len`.
    pub fn validate(&self) -> Result<()> {
        let len = self.len();
        let highest = match self {
            Code::Index { index, .. } => Some(*index),
            Code::Dense(_) => None,
            Code::Sparse { entries, .. } => entries.iter().map(|&(i, _)| i).max(),
        };
        match highest {
            Some(index) if index >= len => Err(UlerlError::ShapeMismatch {
                expected: len,
                got: index + 1,
            }),
            _ => Ok(()),
        }
    }

    /// Controller input: one value per prototype.
    ///
    /// Indices at or past `len` are dropped; [`Code::validate`] reports them.
    pub fn to_dense(&self) -> Vec<f64> {
        match self {
            Code::Index { index, len } => {
                let mut dense = vec![0.0; *len];
                if let Some(slot) = dense.get_mut(*index) {
                    *slot = 1.0;
                }
                dense
            }
            Code::Dense(weights) => weights.clone(),
            Code::Sparse { len, entries } => {
                let mut dense = vec![0.0; *len];
                for &(i, w) in entries {
                    if let Some(slot) = dense.get_mut(i) {
                        *slot = w;
                    }
                }
                dense
            }
        }
    }

    /// `(prototype, weight)` pairs with non-zero weight.
    pub fn nonzero(&self) -> Vec<(usize, f64)> {
        match self {
            Code::Index { index, .. } => vec![(*index, 1.0)],
            Code::Dense(weights) => weights
                .iter()
                .enumerate()
                .filter(|(_, &w)| w != 0.0)
                .map(|(i, &w)| (i, w))
                .collect(),
            Code::Sparse { entries, .. } => entries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_densifies_to_one_hot() {
        let code = Code::Index { index: 2, len: 4 };
        assert_eq!(code.len(), 4);
        assert_eq!(code.to_dense(), vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_sparse_densifies() {
        let code = Code::Sparse {
            len: 5,
            entries: vec![(1, 0.7), (4, 0.9)],
        };
        assert_eq!(code.to_dense(), vec![0.0, 0.7, 0.0, 0.0, 0.9]);
        assert_eq!(code.nonzero(), vec![(1, 0.7), (4, 0.9)]);
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let index = Code::Index { index: 7, len: 2 };
        assert!(matches!(
            index.validate(),
            Err(UlerlError::ShapeMismatch { expected: 2, got: 8 })
        ));
        assert_eq!(index.to_dense(), vec![0.0, 0.0]);

        let sparse = Code::Sparse {
            len: 3,
            entries: vec![(0, 0.5), (3, 0.9)],
        };
        assert!(sparse.validate().is_err());
        assert_eq!(sparse.to_dense(), vec![0.5, 0.0, 0.0]);

        assert!(Code::Index { index: 1, len: 2 }.validate().is_ok());
        assert!(Code::Dense(vec![0.1, 0.2]).validate().is_ok());
    }
}
