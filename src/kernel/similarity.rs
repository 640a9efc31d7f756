//! Similarity and reconstruction-error measures over `f64` slices.
//!
//! When compiled with the `simd` feature, dot products and squared
//! distances go through SIMD-accelerated implementations.

use serde::{Deserialize, Serialize};

/// How close an observation is to a prototype. Higher means more similar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMeasure {
    /// Raw inner product
    #[default]
    Dot,
    /// `1 - mean squared error`, so identical vectors score 1
    Mse,
}

impl SimilarityMeasure {
    /// Compute the similarity between two equally long vectors.
    pub fn compute(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            SimilarityMeasure::Dot => dot(a, b),
            SimilarityMeasure::Mse => 1.0 - mean_squared_error(a, b),
        }
    }
}

/// Reconstruction error used as novelty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoveltyMetric {
    /// Sum of absolute differences
    #[default]
    AbsoluteSum,
    /// Sum of squared differences
    SquaredSum,
}

impl NoveltyMetric {
    pub fn compute(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            NoveltyMetric::AbsoluteSum => absolute_error_sum(a, b),
            NoveltyMetric::SquaredSum => squared_distance(a, b),
        }
    }
}

/// Raw dot product.
#[cfg(feature = "simd")]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    use simsimd::SpatialSimilarity;
    assert_eq!(a.len(), b.len(), "Dimension mismatch in dot product");
    f64::dot(a, b).unwrap_or_else(|| dot_raw(a, b))
}

#[cfg(not(feature = "simd"))]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    dot_raw(a, b)
}

#[allow(dead_code)]
fn dot_raw(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "Dimension mismatch in dot product");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Sum of squared differences.
#[cfg(feature = "simd")]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    use simsimd::SpatialSimilarity;
    assert_eq!(a.len(), b.len(), "Dimension mismatch in squared distance");
    f64::sqeuclidean(a, b).unwrap_or_else(|| squared_distance_raw(a, b))
}

#[cfg(not(feature = "simd"))]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    squared_distance_raw(a, b)
}

#[allow(dead_code)]
fn squared_distance_raw(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "Dimension mismatch in squared distance");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Mean of squared differences. Zero for empty input.
pub fn mean_squared_error(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    squared_distance(a, b) / a.len() as f64
}

/// Sum of absolute differences.
pub fn absolute_error_sum(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "Dimension mismatch in absolute error");
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}
